//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bridge from YAMCS parameter subscriptions to packets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Reads lander parameters from the YAMCS WebSocket API. A background task
//! owns the socket and forwards decoded parameter batches over a channel;
//! reads drain the channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{DataPathway, DataSource, Packet, Value};
use iris_gds_common::XcvrConfig;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};

use crate::core::{RawFrame, Transceiver, TransceiverCore};
use crate::endec::EndecChain;
use crate::lander::{self, LanderSample};
use crate::{Result, TransceiverError};

/// How long a read waits for the next batch.
const POLL: Duration = Duration::from_millis(100);

/// Where and what to subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamcsOpts {
    /// Server root, `ws://` or `wss://`.
    pub url: String,
    /// YAMCS instance.
    pub instance: String,
    /// Processor within the instance.
    pub processor: String,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Qualified parameter names.
    pub params: Vec<String>,
}

impl YamcsOpts {
    /// Options from the transceiver config, subscribed to every known
    /// lander parameter.
    pub fn from_config(config: &XcvrConfig) -> Self {
        Self {
            url: config.yamcs_url.clone(),
            instance: config.yamcs_instance.clone(),
            processor: config.yamcs_processor.clone(),
            username: config.yamcs_username.clone(),
            password: config.yamcs_password.clone(),
            params: lander::all_params().into_iter().map(str::to_owned).collect(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/websocket", self.url.trim_end_matches('/'))
    }
}

/// One parameter update.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterValue {
    /// Qualified name.
    pub name: String,
    /// Engineering value.
    pub value: Value,
    /// When the lander generated the value.
    pub generation_time: Option<DateTime<Utc>>,
    /// When YAMCS received it.
    pub reception_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum Incoming {
    Values(Vec<ParameterValue>),
    Closed(String),
}

/// Subscription request for `opts.params`.
fn subscribe_message(opts: &YamcsOpts) -> String {
    let ids: Vec<_> = opts.params.iter().map(|name| json!({ "name": name })).collect();
    json!({
        "type": "parameters",
        "id": 1,
        "options": {
            "instance": opts.instance,
            "processor": opts.processor,
            "id": ids,
            "sendFromCache": true,
            "abortOnInvalid": false,
        }
    })
    .to_string()
}

fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Engineering value from its protobuf-JSON form. 64-bit integers arrive
/// as strings.
fn eng_value(value: &serde_json::Value) -> Option<Value> {
    let kind = value.get("type")?.as_str()?;
    let int64 = |field: &str| -> Option<i64> {
        let v = value.get(field)?;
        v.as_i64().or_else(|| v.as_str()?.parse().ok())
    };
    match kind {
        "BINARY" => BASE64
            .decode(value.get("binaryValue")?.as_str()?)
            .ok()
            .map(Value::Bytes),
        "FLOAT" => value.get("floatValue")?.as_f64().map(Value::Float),
        "DOUBLE" => value.get("doubleValue")?.as_f64().map(Value::Float),
        "UINT32" => value.get("uint32Value")?.as_u64().map(Value::UInt),
        "SINT32" => value.get("sint32Value")?.as_i64().map(Value::Int),
        "UINT64" => {
            let v = value.get("uint64Value")?;
            v.as_u64().or_else(|| v.as_str()?.parse().ok()).map(Value::UInt)
        }
        "SINT64" => int64("sint64Value").map(Value::Int),
        "BOOLEAN" => value.get("booleanValue")?.as_bool().map(Value::Bool),
        "STRING" | "ENUMERATED" => value
            .get("stringValue")?
            .as_str()
            .map(|s| Value::Text(s.to_owned())),
        "TIMESTAMP" => value.get("stringValue")?.as_str().map(|s| Value::Text(s.to_owned())),
        _ => None,
    }
}

/// Parameter values in one server message. `mapping` accumulates the
/// numeric IDs the server assigns to names.
fn parse_message(text: &str, mapping: &mut HashMap<u64, String>) -> Vec<ParameterValue> {
    let Ok(message) = serde_json::from_str::<serde_json::Value>(text) else {
        warn!(len = text.len(), "YAMCS sent a message that is not JSON");
        return Vec::new();
    };
    if message.get("type").and_then(|t| t.as_str()) != Some("parameters") {
        trace!(message = %text, "ignoring YAMCS message");
        return Vec::new();
    }
    let Some(data) = message.get("data") else {
        return Vec::new();
    };
    if let Some(entries) = data.get("mapping").and_then(|m| m.as_object()) {
        for (id, entry) in entries {
            if let (Ok(id), Some(name)) = (id.parse::<u64>(), entry.get("name").and_then(|n| n.as_str())) {
                mapping.insert(id, name.to_owned());
            }
        }
    }
    let Some(values) = data.get("values").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|entry| {
            let id = entry.get("numericId")?.as_u64()?;
            let Some(name) = mapping.get(&id) else {
                warn!(id, "YAMCS value for an unmapped parameter");
                return None;
            };
            let Some(value) = entry.get("engValue").and_then(eng_value) else {
                warn!(param = %name, "YAMCS value has no usable engineering value");
                return None;
            };
            let reception = entry.get("receptionTime").or_else(|| entry.get("acquisitionTime"));
            Some(ParameterValue {
                name: name.clone(),
                value,
                generation_time: entry.get("generationTime").and_then(parse_time),
                reception_time: reception.and_then(parse_time),
            })
        })
        .collect()
}

/// Live bridge to the lander's YAMCS server. Downlink only.
pub struct YamcsTransceiver {
    core: TransceiverCore,
    opts: YamcsOpts,
    inbox: Option<mpsc::UnboundedReceiver<Incoming>>,
    task: Option<JoinHandle<()>>,
    lander: Vec<LanderSample>,
}

impl YamcsTransceiver {
    /// Bridge configured by `opts`.
    pub fn new(opts: YamcsOpts, endecs: EndecChain, standards: Arc<DataStandards>) -> Self {
        Self {
            core: TransceiverCore::new(
                "yamcs",
                standards,
                endecs,
                DataPathway::None,
                DataSource::Yamcs,
            ),
            opts,
            inbox: None,
            task: None,
            lander: Vec::new(),
        }
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.inbox = None;
    }

    /// Split one batch into Iris frames and held housekeeping samples.
    fn split(&mut self, values: Vec<ParameterValue>) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        for param in values {
            if let Some(pathway) = lander::iris_pathway(&param.name) {
                let Value::Bytes(bytes) = param.value else {
                    warn!(param = %param.name, "Iris telemetry parameter is not binary");
                    continue;
                };
                frames.push(RawFrame {
                    bytes,
                    pathway: Some(pathway),
                    lander_rx: param.generation_time,
                    amcc_rx: param.reception_time,
                });
            } else {
                self.lander.push(LanderSample {
                    name: param.name,
                    value: param.value,
                    generation_time: param.generation_time,
                    reception_time: param.reception_time,
                });
            }
        }
        frames
    }
}

impl Drop for YamcsTransceiver {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Transceiver for YamcsTransceiver {
    fn core(&self) -> &TransceiverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TransceiverCore {
        &mut self.core
    }

    async fn open(&mut self) -> Result<()> {
        self.close();
        let endpoint = self.opts.endpoint();
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|err| TransceiverError::Config(format!("bad YAMCS url {endpoint}: {err}")))?;
        if let Some(user) = &self.opts.username {
            let password = self.opts.password.as_deref().unwrap_or_default();
            let token = BASE64.encode(format!("{user}:{password}"));
            let header = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|err| TransceiverError::Config(format!("bad YAMCS credentials: {err}")))?;
            request.headers_mut().insert(AUTHORIZATION, header);
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| TransceiverError::Connection(format!("YAMCS at {endpoint}: {err}")))?;
        socket
            .send(Message::Text(subscribe_message(&self.opts)))
            .await
            .map_err(|err| TransceiverError::Connection(format!("YAMCS subscribe failed: {err}")))?;
        info!(
            url = %endpoint,
            instance = %self.opts.instance,
            processor = %self.opts.processor,
            params = self.opts.params.len(),
            "subscribed to YAMCS parameters"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.task = Some(tokio::spawn(async move {
            let mut mapping = HashMap::new();
            let reason = loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let values = parse_message(&text, &mut mapping);
                        if !values.is_empty() && tx.send(Incoming::Values(values)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break format!("closed by server: {frame:?}"),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break err.to_string(),
                    None => break "stream ended".to_owned(),
                }
            };
            let _ = tx.send(Incoming::Closed(reason));
        }));
        self.inbox = Some(rx);
        Ok(())
    }

    /// Iris frames received since the last read. Housekeeping values are
    /// held for [`downlink_packets`](Transceiver::downlink_packets).
    async fn downlink(&mut self) -> Result<Vec<RawFrame>> {
        let inbox = self
            .inbox
            .as_mut()
            .ok_or_else(|| TransceiverError::Connection("YAMCS bridge is not open".to_owned()))?;
        let mut batches = Vec::new();
        match tokio::time::timeout(POLL, inbox.recv()).await {
            Ok(Some(first)) => batches.push(first),
            Ok(None) => return Err(TransceiverError::Connection("YAMCS task ended".to_owned())),
            Err(_) => return Ok(Vec::new()),
        }
        while let Ok(next) = inbox.try_recv() {
            batches.push(next);
        }

        let mut frames = Vec::new();
        for batch in batches {
            match batch {
                Incoming::Values(values) => frames.extend(self.split(values)),
                Incoming::Closed(reason) => {
                    self.close();
                    return Err(TransceiverError::Connection(format!("YAMCS connection lost: {reason}")));
                }
            }
        }
        debug!(frames = frames.len(), held = self.lander.len(), "YAMCS batch");
        Ok(frames)
    }

    async fn downlink_packets(&mut self) -> Result<Vec<Packet>> {
        let frames = self.downlink().await?;
        let mut packets = self.core.process_frames(frames);
        let samples = std::mem::take(&mut self.lander);
        if samples.is_empty() {
            return Ok(packets);
        }
        let generation = samples.iter().find_map(|s| s.generation_time);
        let reception = samples.iter().find_map(|s| s.reception_time);
        if let Some(packet) = lander::peregrine_packet(self.core.standards(), samples) {
            packets.push(self.core.finish_packet(
                packet,
                Some(DataPathway::None),
                generation,
                reception,
            ));
        }
        Ok(packets)
    }

    async fn uplink(&mut self, bytes: &[u8]) -> Result<()> {
        warn!(len = bytes.len(), "the YAMCS bridge cannot uplink, dropping bytes");
        Err(TransceiverError::Config("the YAMCS bridge is downlink only".to_owned()))
    }
}
