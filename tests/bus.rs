//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Uplink through a live proxy with an archiving tap."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use indexmap::IndexMap;
use iris_gds_archive::{replay, ArchiveSink};
use iris_gds_catalog::{fixtures, DataStandards};
use iris_gds_codec::{CommandPayload, Payload, Value};
use iris_gds_common::{ArchiveConfig, IpcConfig, UplinkConfig};
use iris_gds_ipc::{
    AppContext, AppControlMessage, AppAction, AppManager, Endpoint, IpcPayload, IpcSocket, PacketSplit,
    Port, Serializer, SocketOptions, SocketSpec, SocketTopicHandler, TargetXcvr, Topic,
    TopicHandlerTable, TopicProxy, UplinkPacketRequestMessage, UplinkPayloadsRequestMessage,
};
use iris_gds_uplink::UplinkProcessor;
use parking_lot::Mutex;
use tokio::sync::broadcast;

fn config() -> IpcConfig {
    IpcConfig {
        poll_interval: Duration::from_millis(20),
        join_timeout: Duration::from_secs(2),
        connect_retry: Duration::from_millis(20),
        ..IpcConfig::default()
    }
}

fn any_port() -> Endpoint {
    Endpoint::Bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
}

/// Stand-in for the uplink processor app.
struct UplinkApp {
    processor: Arc<Mutex<UplinkProcessor>>,
}

impl SocketTopicHandler for UplinkApp {
    fn handlers(&self) -> TopicHandlerTable {
        let processor = self.processor.clone();
        let handler = move |ctx: AppContext, payload: IpcPayload| {
            let processor = processor.clone();
            async move {
                let request = UplinkPayloadsRequestMessage::try_from(ctx.decode(&payload)?)?;
                let outcome = processor.lock().process(request);
                for packet in outcome.packets {
                    ctx.send_to("pub", packet, &payload.subtopic_bytes)?;
                }
                Ok(())
            }
        };
        let mut table = TopicHandlerTable::new();
        table.insert(Topic::UlPayloads, Arc::new(handler));
        table
    }
}

fn drive(standards: &DataStandards) -> Result<Payload> {
    let mut args = IndexMap::new();
    args.insert("distance".to_owned(), Value::UInt(200));
    args.insert("speed".to_owned(), Value::UInt(100));
    args.insert("callback_id".to_owned(), Value::UInt(0xBEEF));
    Ok(CommandPayload::from_name(standards, "Navigation_NavDriveForward", args)?.into())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uplink_request_comes_back_as_a_packet_and_is_archived() -> Result<()> {
    let config = config();
    let opts = SocketOptions::from_config(&config);
    let serializer = Serializer::from_config(&config);
    let standards = Arc::new(fixtures::standards());

    let proxy = TopicProxy::bind(any_port(), any_port(), opts).await?;
    let (inbound, outbound) = (proxy.inbound_addr(), proxy.outbound_addr());
    let (stop, rx) = broadcast::channel(1);
    let proxy_task = tokio::spawn(proxy.run(rx));

    let specs = [
        SocketSpec::new("sub", Port::TransceiverSub)
            .subscribing(&[Topic::UlPayloads, Topic::AppControl])
            .at(outbound),
        SocketSpec::new("pub", Port::TransceiverPub).at(inbound),
    ];
    let mut manager = AppManager::open("ul-processor", &config, &specs).await?;
    let processor = UplinkProcessor::new(standards.clone(), &UplinkConfig { use_seq_num: true });
    manager.attach(
        "sub",
        &UplinkApp {
            processor: Arc::new(Mutex::new(processor)),
        },
    )?;
    let running = tokio::spawn(manager.run());

    let operator = IpcSocket::publisher("operator", Endpoint::Connect(inbound), opts).await?;
    let mut xcvr = IpcSocket::subscriber(
        "xcvr-serial",
        Endpoint::Connect(outbound),
        &[Topic::UlPayloads, Topic::UlPacket],
        opts,
    )
    .await?;

    let request = UplinkPayloadsRequestMessage {
        payloads: vec![drive(&standards)?],
        split: PacketSplit::Individual,
        packet_class: None,
        target_xcvr: TargetXcvr::Serial,
    };
    let request = IpcPayload::new(
        Topic::UlPayloads,
        b"operator".to_vec(),
        serializer.encode(&request.into())?,
    );

    let dir = tempfile::tempdir()?;
    let mut sink = ArchiveSink::create(
        &ArchiveConfig {
            directory: dir.path().to_path_buf(),
            summary_interval: Duration::from_secs(60),
        },
        Utc::now(),
    )?;

    let mut packet = None;
    for _ in 0..200 {
        operator.send(request.clone())?;
        while let Some(got) = xcvr.recv_timeout(Duration::from_millis(20)).await? {
            sink.archive(&got, Utc::now())?;
            if got.topic() == Some(Topic::UlPacket) && packet.is_none() {
                packet = Some(got);
            }
        }
        if packet.is_some() {
            break;
        }
    }
    let packet = packet.ok_or_else(|| anyhow!("no UL_PACKET came back through the proxy"))?;
    assert_eq!(packet.subtopic_bytes, b"operator");

    let message = UplinkPacketRequestMessage::try_from(serializer.decode_for(Topic::UlPacket, &packet.msg_bytes)?)?;
    assert_eq!(message.target_xcvr, TargetXcvr::Serial);
    let names: Vec<String> = message
        .packet
        .payloads()
        .commands()
        .filter_map(|c| c.name(&standards))
        .collect();
    assert_eq!(names, ["Navigation_NavDriveForward"]);

    // Every archived envelope still verifies under the bus key.
    sink.flush()?;
    let mut topics = Vec::new();
    let replayed = replay(sink.path(), |record| {
        let payload = record.to_payload()?;
        let topic = payload.topic().expect("archived topic is registered");
        serializer
            .decode_for(topic, &payload.msg_bytes)
            .expect("archived envelope verifies");
        topics.push(topic);
        Ok(())
    })?;
    assert!(replayed >= 2);
    assert!(topics.contains(&Topic::UlPayloads));
    assert!(topics.contains(&Topic::UlPacket));

    let shutdown = AppControlMessage {
        target_app: Some("ul-processor".to_owned()),
        action: AppAction::Shutdown,
    };
    let shutdown = IpcPayload::new(Topic::AppControl, Vec::new(), serializer.encode(&shutdown.into())?);
    while !running.is_finished() {
        operator.send(shutdown.clone())?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    running.await??;

    stop.send(())?;
    let forwarded = proxy_task.await??;
    assert!(forwarded >= 2);
    Ok(())
}
