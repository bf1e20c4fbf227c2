//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stateless forwarder between the two ports of a channel."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Topic proxy. Publishers connect to the inbound (pub-side) port, where
//! the proxy listens as a subscriber to every topic; subscribers connect to
//! the outbound (sub-side) port, where the proxy listens as a publisher and
//! filters by each peer's subscription frames. Nothing is stored: a payload
//! that no subscriber wants is dropped.

use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ports::{Port, PortSide};
use crate::socket::{Endpoint, IpcSocket, SocketOptions, SocketStatsSnapshot};
use crate::{IpcError, Result};

/// Forwarder for one logical channel.
#[derive(Debug)]
pub struct TopicProxy {
    inbound: IpcSocket,
    outbound: IpcSocket,
}

impl TopicProxy {
    /// Listen for publishers at `inbound` and subscribers at `outbound`.
    pub async fn bind(inbound: Endpoint, outbound: Endpoint, opts: SocketOptions) -> Result<Self> {
        let inbound = IpcSocket::subscriber("proxy-inbound", inbound, &[], opts).await?;
        let outbound = IpcSocket::publisher("proxy-outbound", outbound, opts).await?;
        Ok(Self { inbound, outbound })
    }

    /// Bind the well-known ports of a channel on `host`.
    pub async fn for_ports(
        host: &str,
        inbound: Port,
        outbound: Port,
        opts: SocketOptions,
    ) -> Result<Self> {
        if inbound.side() != PortSide::Pub {
            return Err(IpcError::Config(format!(
                "inbound port {inbound} is not a publisher-side port"
            )));
        }
        if outbound.side() != PortSide::Sub {
            return Err(IpcError::Config(format!(
                "outbound port {outbound} is not a subscriber-side port"
            )));
        }
        let proxy = Self::bind(
            Endpoint::resolve(host, inbound, true)?,
            Endpoint::resolve(host, outbound, true)?,
            opts,
        )
        .await?;
        info!(%inbound, %outbound, "topic proxy bound");
        Ok(proxy)
    }

    /// Address publishers connect to.
    pub fn inbound_addr(&self) -> SocketAddr {
        self.inbound.endpoint().addr()
    }

    /// Address subscribers connect to.
    pub fn outbound_addr(&self) -> SocketAddr {
        self.outbound.endpoint().addr()
    }

    /// Counters of the inbound and the outbound socket.
    pub fn stats(&self) -> (SocketStatsSnapshot, SocketStatsSnapshot) {
        (self.inbound.stats(), self.outbound.stats())
    }

    /// Forward until `shutdown` fires. Returns the number of payloads
    /// forwarded.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<u64> {
        let mut forwarded = 0u64;
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                received = self.inbound.recv() => received?,
            };
            debug!(
                topic = %String::from_utf8_lossy(&received.topic_bytes),
                bytes = received.msg_bytes.len(),
                "forwarding"
            );
            if let Err(err) = self.outbound.send(received) {
                warn!(error = %err, "outbound socket refused payload");
                continue;
            }
            forwarded += 1;
        }
        let (inbound, outbound) = self.stats();
        info!(forwarded, ?inbound, ?outbound, "topic proxy stopped");
        self.inbound.close();
        self.outbound.close();
        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::IpcPayload;
    use crate::topics::Topic;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn any_port() -> Endpoint {
        Endpoint::Bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }

    fn opts() -> SocketOptions {
        SocketOptions {
            max_frame_bytes: 1 << 20,
            connect_retry: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn port_sides_are_checked() {
        let err = TopicProxy::for_ports("127.0.0.1", Port::GuiSub, Port::GuiPub, opts())
            .await
            .expect_err("wrong sides");
        assert!(matches!(err, IpcError::Config(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn forwards_only_subscribed_topics_between_many_peers() {
        let proxy = TopicProxy::bind(any_port(), any_port(), opts()).await.expect("bind");
        let (inbound, outbound) = (proxy.inbound_addr(), proxy.outbound_addr());
        let (stop, rx) = broadcast::channel(1);
        let running = tokio::spawn(proxy.run(rx));

        let first = IpcSocket::publisher("xcvr-a", Endpoint::Connect(inbound), opts())
            .await
            .expect("publisher");
        let second = IpcSocket::publisher("xcvr-b", Endpoint::Connect(inbound), opts())
            .await
            .expect("publisher");
        let mut packets =
            IpcSocket::subscriber("dl", Endpoint::Connect(outbound), &[Topic::DlPackets], opts())
                .await
                .expect("subscriber");
        let mut control =
            IpcSocket::subscriber("ctl", Endpoint::Connect(outbound), &[Topic::AppControl], opts())
                .await
                .expect("subscriber");

        let mut from = Vec::new();
        for _ in 0..200 {
            first
                .send(IpcPayload::new(Topic::DlPackets, b"a".to_vec(), vec![1]))
                .expect("send");
            second
                .send(IpcPayload::new(Topic::DlPackets, b"b".to_vec(), vec![2]))
                .expect("send");
            while let Some(got) = packets.try_recv() {
                assert_eq!(got.topic(), Some(Topic::DlPackets));
                if !from.contains(&got.subtopic_bytes) {
                    from.push(got.subtopic_bytes);
                }
            }
            if from.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(from.len(), 2, "both publishers should get through");
        assert!(control.try_recv().is_none(), "control subscriber got data packets");

        stop.send(()).expect("stop");
        let forwarded = running.await.expect("join").expect("run");
        assert!(forwarded >= 2);
    }
}
