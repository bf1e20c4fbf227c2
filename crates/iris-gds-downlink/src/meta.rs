//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "MetaChannel runtime: update policies, caches, and recursive evaluation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Ground-computed telemetry. A [`MetaChannel`] watches other channels
//! (possibly other MetaChannels) and emits a derived value whenever its
//! [`UpdateBehavior`] is satisfied. [`MetaModule`] groups channels under one
//! reserved module ID and [`MetaRuntime`] feeds samples through every module,
//! recursively, so derived values can be watched in turn.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iris_gds_catalog::{
    add_metamodules, DataStandards, DataType, EnumItem, MetaChannelDecl, MetaModuleDecl,
    META_MODULE_PREFIX,
};
use iris_gds_codec::{DataPathway, DataSource, DownlinkTimes, TelemetryPayload, Value};
use iris_gds_common::time::to_chrono;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, error};

use crate::{DownlinkError, Result};

/// Largest number of channels a MetaModule can carry (8-bit channel IDs).
pub const MAX_CHANNELS_PER_MODULE: usize = 255;

/// When a MetaChannel recalculates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateBehavior {
    /// Any watched channel received a value since the last calculation.
    Any,
    /// Every watched channel received a value since the last calculation.
    All,
    /// Only on a clock tick, never from incoming values.
    TimeOnly,
}

/// Per-channel cache and rate options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Values kept per watched channel, newest first.
    pub cache_depth: usize,
    /// Values every watched channel must hold before the channel may fire.
    pub min_values: usize,
    /// Minimum time between two calculations.
    pub min_interval: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            cache_depth: 1,
            min_values: 0,
            min_interval: None,
        }
    }
}

/// One observed channel value as MetaChannels see it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Qualified `Module_Channel` name.
    pub name: String,
    /// Value.
    pub value: Value,
    /// Rover clock, ms; 0 for ground-generated values.
    pub timestamp: u32,
    /// Ground-side times of the datum.
    pub downlink_times: Option<DownlinkTimes>,
}

impl Sample {
    /// Sample of a telemetry payload, if the catalog knows its channel.
    pub fn from_payload(payload: &TelemetryPayload, standards: &DataStandards) -> Option<Self> {
        Some(Self {
            name: payload.name(standards)?,
            value: payload.value.clone(),
            timestamp: payload.timestamp,
            downlink_times: payload.downlink_times,
        })
    }
}

/// Read-only view of a channel's caches handed to [`MetaChannel::calculate`].
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    cache: &'a HashMap<String, VecDeque<Sample>>,
    trigger: Option<&'a Sample>,
}

impl<'a> Inputs<'a> {
    /// Newest cached value of `name`.
    pub fn latest(&self, name: &str) -> Option<&'a Sample> {
        self.cache.get(name).and_then(|values| values.front())
    }

    /// Cached values of `name`, newest first.
    pub fn recent(&self, name: &str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.cache.get(name).into_iter().flat_map(|values| values.iter())
    }

    /// Newest value of `name` as a float.
    pub fn value_f64(&self, name: &str) -> Option<f64> {
        self.latest(name).and_then(|sample| sample.value.as_f64())
    }

    /// Sample that caused this calculation; `None` on a clock tick.
    pub fn trigger(&self) -> Option<&'a Sample> {
        self.trigger
    }
}

/// Result of a calculation: the new value and the samples it was derived
/// from.
#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    /// Derived value.
    pub value: Value,
    /// Source samples the value depends on.
    pub consulted: Vec<Sample>,
}

impl Calculation {
    /// Calculation from `value` and the samples it consulted.
    pub fn new(value: impl Into<Value>, consulted: Vec<Sample>) -> Self {
        Self {
            value: value.into(),
            consulted,
        }
    }
}

/// Catalog prototype of a MetaChannel.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaChannelProto {
    /// Channel name within its module.
    pub name: String,
    /// Channel ID within its module.
    pub id: u8,
    /// Output type.
    pub datatype: DataType,
    /// Items for enum outputs.
    pub enum_items: Vec<EnumItem>,
}

impl MetaChannelProto {
    /// Prototype of a non-enum channel.
    pub fn new(name: impl Into<String>, id: u8, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            id,
            datatype,
            enum_items: Vec::new(),
        }
    }
}

/// A ground-computed telemetry channel.
pub trait MetaChannel: Send {
    /// Catalog prototype.
    fn proto(&self) -> MetaChannelProto;

    /// Qualified names of the watched channels.
    fn watching(&self) -> Vec<String>;

    /// Watch every telemetry channel instead of a fixed list.
    fn watches_everything(&self) -> bool {
        false
    }

    /// When to recalculate.
    fn update_behavior(&self) -> UpdateBehavior;

    /// Cache and rate options.
    fn options(&self) -> ChannelOptions {
        ChannelOptions::default()
    }

    /// Derive a new value from the cached inputs. `None` means no output
    /// this time.
    fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation>;
}

/// A payload produced by a MetaChannel.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Qualified name of the emitting channel.
    pub channel: String,
    /// Synthetic telemetry.
    pub payload: TelemetryPayload,
}

impl Emission {
    /// The emission as a sample for downstream MetaChannels.
    pub fn sample(&self) -> Sample {
        Sample {
            name: self.channel.clone(),
            value: self.payload.value.clone(),
            timestamp: self.payload.timestamp,
            downlink_times: self.payload.downlink_times,
        }
    }
}

/// Downlink times for a derived payload: those of the consulted sample with
/// the latest `scet_est`, else the latest `lander_rx`, `amcc_rx`, then
/// `pmcc_rx`. With no times at all, `now` stands in for both the SCET
/// estimate and the PMCC receipt.
pub fn inherited_downlink_times(consulted: &[Sample], now: DateTime<Utc>) -> DownlinkTimes {
    type Key = fn(&DownlinkTimes) -> Option<DateTime<Utc>>;
    let keys: [Key; 4] = [
        |t: &DownlinkTimes| t.scet_est,
        |t: &DownlinkTimes| t.lander_rx,
        |t: &DownlinkTimes| t.amcc_rx,
        |t: &DownlinkTimes| t.pmcc_rx,
    ];
    for key in keys {
        let newest = consulted
            .iter()
            .filter_map(|sample| sample.downlink_times.as_ref())
            .filter_map(|times| key(times).map(|at| (at, times)))
            .max_by_key(|(at, _)| *at);
        if let Some((_, times)) = newest {
            return *times;
        }
    }
    DownlinkTimes {
        scet_est: Some(now),
        pmcc_rx: Some(now),
        ..DownlinkTimes::default()
    }
}

/// Runtime state of one MetaChannel.
struct MetaField {
    channel: Box<dyn MetaChannel>,
    qualified: String,
    module_id: u16,
    channel_id: u8,
    behavior: UpdateBehavior,
    options: ChannelOptions,
    everything: bool,
    watching: HashSet<String>,
    cache: HashMap<String, VecDeque<Sample>>,
    fresh: HashSet<String>,
    last_calc: Option<DateTime<Utc>>,
}

impl MetaField {
    fn watches(&self, name: &str) -> bool {
        name != self.qualified && (self.everything || self.watching.contains(name))
    }

    fn has_min_values(&self) -> bool {
        let needed = self.options.min_values;
        if needed == 0 {
            return true;
        }
        let held = |name: &String| self.cache.get(name).map_or(0, VecDeque::len) >= needed;
        if self.everything {
            !self.cache.is_empty() && self.cache.keys().all(held)
        } else {
            self.watching.iter().all(held)
        }
    }

    fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        match (self.options.min_interval, self.last_calc) {
            (Some(min), Some(last)) => now - last >= to_chrono(min),
            _ => true,
        }
    }

    fn ingest(&mut self, sample: &Sample, now: DateTime<Utc>) -> Option<Emission> {
        if !self.watches(&sample.name) {
            return None;
        }
        let values = self.cache.entry(sample.name.clone()).or_default();
        values.push_front(sample.clone());
        values.truncate(self.options.cache_depth);
        self.fresh.insert(sample.name.clone());

        if !self.has_min_values() {
            return None;
        }
        let ready = match self.behavior {
            UpdateBehavior::Any => !self.fresh.is_empty(),
            // Watching everything, ALL waits on every channel seen so far.
            UpdateBehavior::All if self.everything => {
                self.cache.keys().all(|name| self.fresh.contains(name))
            }
            UpdateBehavior::All => self.watching.iter().all(|name| self.fresh.contains(name)),
            UpdateBehavior::TimeOnly => false,
        };
        if !ready || !self.interval_elapsed(now) {
            return None;
        }
        self.fire(Some(sample), now)
    }

    fn tick(&mut self, now: DateTime<Utc>) -> Option<Emission> {
        if self.behavior != UpdateBehavior::TimeOnly
            || !self.has_min_values()
            || !self.interval_elapsed(now)
        {
            return None;
        }
        self.fire(None, now)
    }

    fn fire(&mut self, trigger: Option<&Sample>, now: DateTime<Utc>) -> Option<Emission> {
        self.fresh.clear();
        self.last_calc = Some(now);
        let inputs = Inputs {
            cache: &self.cache,
            trigger,
        };
        let calculation = self.channel.calculate(&inputs)?;
        let mut payload = TelemetryPayload::new(self.module_id, self.channel_id, calculation.value, 0);
        payload.downlink_times = Some(inherited_downlink_times(&calculation.consulted, now));
        payload.pathway = DataPathway::None;
        payload.source = DataSource::Generated;
        debug!(channel = %self.qualified, value = %payload.value, "metachannel fired");
        Some(Emission {
            channel: self.qualified.clone(),
            payload,
        })
    }
}

impl fmt::Debug for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaField")
            .field("qualified", &self.qualified)
            .field("behavior", &self.behavior)
            .field("options", &self.options)
            .field("last_calc", &self.last_calc)
            .finish_non_exhaustive()
    }
}

/// A named group of MetaChannels under one reserved module ID.
#[derive(Debug)]
pub struct MetaModule {
    name: String,
    id: u16,
    fields: Vec<MetaField>,
}

impl MetaModule {
    /// Module `name` (prefixed with `MetaMod` if needed) at `id`.
    pub fn new(name: impl Into<String>, id: u16, channels: Vec<Box<dyn MetaChannel>>) -> Result<Self> {
        let name = name.into();
        let name = if name.starts_with(META_MODULE_PREFIX) {
            name
        } else {
            format!("{META_MODULE_PREFIX}{name}")
        };
        if channels.len() > MAX_CHANNELS_PER_MODULE {
            return Err(DownlinkError::Meta(format!(
                "{name} has {} channels, at most {MAX_CHANNELS_PER_MODULE} fit",
                channels.len()
            )));
        }

        let mut fields = Vec::with_capacity(channels.len());
        for channel in channels {
            let proto = channel.proto();
            let qualified = format!("{name}_{}", proto.name);
            let behavior = channel.update_behavior();
            let options = channel.options();
            if options.cache_depth == 0 {
                return Err(DownlinkError::Meta(format!("{qualified}: cache depth must be at least 1")));
            }
            if options.min_values > options.cache_depth {
                return Err(DownlinkError::Meta(format!(
                    "{qualified}: needs {} values but caches only {}",
                    options.min_values, options.cache_depth
                )));
            }
            if behavior == UpdateBehavior::TimeOnly && options.min_interval.is_none() {
                return Err(DownlinkError::Meta(format!(
                    "{qualified}: TIME_ONLY channels need a minimum interval"
                )));
            }
            fields.push(MetaField {
                qualified,
                module_id: id,
                channel_id: proto.id,
                behavior,
                options,
                everything: channel.watches_everything(),
                watching: channel.watching().into_iter().collect(),
                cache: HashMap::new(),
                fresh: HashSet::new(),
                last_calc: None,
                channel,
            });
        }
        Ok(Self { name, id, fields })
    }

    /// Prefixed module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module ID.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Qualified names of the module's channels.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|field| field.qualified.as_str())
    }

    /// Catalog declaration of the module.
    pub fn decl(&self) -> MetaModuleDecl {
        MetaModuleDecl {
            name: self.name.clone(),
            id: self.id,
            channels: self
                .fields
                .iter()
                .map(|field| {
                    let proto = field.channel.proto();
                    let mut watching: Vec<String> = field.channel.watching();
                    watching.sort();
                    MetaChannelDecl {
                        name: proto.name,
                        id: proto.id,
                        datatype: proto.datatype,
                        enum_items: proto.enum_items,
                        watching,
                    }
                })
                .collect(),
        }
    }

    /// Offer `sample` to every channel.
    pub fn process(&mut self, sample: &Sample, now: DateTime<Utc>) -> Vec<Emission> {
        self.fields
            .iter_mut()
            .filter_map(|field| field.ingest(sample, now))
            .collect()
    }

    /// Clock tick for `TIME_ONLY` channels.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Emission> {
        self.fields.iter_mut().filter_map(|field| field.tick(now)).collect()
    }
}

/// Every MetaModule of a process plus the recursion limit.
#[derive(Debug)]
pub struct MetaRuntime {
    modules: Vec<MetaModule>,
    max_depth: usize,
}

impl MetaRuntime {
    /// Runtime over `modules` evaluating at most `max_depth` rounds per call.
    pub fn new(modules: Vec<MetaModule>, max_depth: usize) -> Self {
        Self { modules, max_depth }
    }

    /// Runtime without modules.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 1)
    }

    /// Registered modules.
    pub fn modules(&self) -> &[MetaModule] {
        &self.modules
    }

    /// Recursion limit.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Add the modules to `standards`, skipping those already present.
    /// Returns how many were added.
    pub fn register(&self, standards: &mut DataStandards) -> Result<usize> {
        let decls: Vec<MetaModuleDecl> = self
            .modules
            .iter()
            .filter(|module| standards.module(module.name()).is_none())
            .map(MetaModule::decl)
            .collect();
        if decls.is_empty() {
            return Ok(0);
        }
        add_metamodules(standards, &decls)?;
        Ok(decls.len())
    }

    /// Feed `seeds` to every module, then feed the emissions back until
    /// nothing new is produced or the depth limit is reached.
    pub fn evaluate(&mut self, seeds: Vec<Sample>, now: DateTime<Utc>) -> Vec<Emission> {
        let mut emitted = Vec::new();
        self.run_rounds(seeds, now, &mut emitted);
        emitted
    }

    /// Clock tick: fire due `TIME_ONLY` channels, then evaluate what watches
    /// them.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Emission> {
        let mut emitted: Vec<Emission> = self
            .modules
            .iter_mut()
            .flat_map(|module| module.tick(now))
            .collect();
        let seeds = emitted.iter().map(Emission::sample).collect();
        self.run_rounds(seeds, now, &mut emitted);
        emitted
    }

    fn run_rounds(&mut self, seeds: Vec<Sample>, now: DateTime<Utc>, emitted: &mut Vec<Emission>) {
        let mut round = seeds;
        let mut depth = 0;
        while !round.is_empty() {
            if depth >= self.max_depth {
                error!(
                    depth,
                    pending = round.len(),
                    "metachannel evaluation hit its depth limit; dropping further rounds"
                );
                break;
            }
            let mut next = Vec::new();
            for sample in &round {
                for module in &mut self.modules {
                    for emission in module.process(sample, now) {
                        next.push(emission.sample());
                        emitted.push(emission);
                    }
                }
            }
            round = next;
            depth += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Sums the newest value of every watched channel.
    struct Sum {
        id: u8,
        watching: Vec<String>,
        behavior: UpdateBehavior,
        options: ChannelOptions,
    }

    impl Sum {
        fn boxed(id: u8, watching: &[&str], behavior: UpdateBehavior) -> Box<dyn MetaChannel> {
            Self::with_options(id, watching, behavior, ChannelOptions::default())
        }

        fn with_options(
            id: u8,
            watching: &[&str],
            behavior: UpdateBehavior,
            options: ChannelOptions,
        ) -> Box<dyn MetaChannel> {
            Box::new(Self {
                id,
                watching: watching.iter().map(|s| s.to_string()).collect(),
                behavior,
                options,
            })
        }
    }

    impl MetaChannel for Sum {
        fn proto(&self) -> MetaChannelProto {
            MetaChannelProto::new(format!("Sum{}", self.id), self.id, DataType::F64)
        }
        fn watching(&self) -> Vec<String> {
            self.watching.clone()
        }
        fn update_behavior(&self) -> UpdateBehavior {
            self.behavior
        }
        fn options(&self) -> ChannelOptions {
            self.options
        }
        fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
            let consulted: Vec<Sample> = self
                .watching
                .iter()
                .filter_map(|name| inputs.latest(name).cloned())
                .collect();
            let total: f64 = consulted.iter().filter_map(|s| s.value.as_f64()).sum();
            Some(Calculation::new(total, consulted))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
    }

    fn sample(name: &str, value: f64) -> Sample {
        Sample {
            name: name.to_string(),
            value: Value::Float(value),
            timestamp: 1,
            downlink_times: None,
        }
    }

    fn values(emissions: &[Emission]) -> Vec<f64> {
        emissions
            .iter()
            .filter_map(|e| e.payload.value.as_f64())
            .collect()
    }

    #[test]
    fn any_fires_on_every_watched_update() {
        let module = MetaModule::new("Test", 0xA100, vec![Sum::boxed(0, &["A_x", "B_y"], UpdateBehavior::Any)])
            .expect("module");
        let mut runtime = MetaRuntime::new(vec![module], 5);
        let out = runtime.evaluate(
            vec![sample("A_x", 1.0), sample("A_x", 2.0), sample("B_y", 5.0), sample("C_z", 9.0)],
            t0(),
        );
        assert_eq!(values(&out), vec![1.0, 2.0, 7.0]);
        assert!(out.iter().all(|e| e.channel == "MetaModTest_Sum0"));
        assert!(out.iter().all(|e| e.payload.module_id == 0xA100 && e.payload.timestamp == 0));
        assert!(out.iter().all(|e| e.payload.source == DataSource::Generated));
    }

    #[test]
    fn all_waits_for_every_watched_channel_and_resets() {
        let module = MetaModule::new("Test", 0xA100, vec![Sum::boxed(0, &["A_x", "B_y"], UpdateBehavior::All)])
            .expect("module");
        let mut runtime = MetaRuntime::new(vec![module], 5);
        let out = runtime.evaluate(
            vec![
                sample("A_x", 1.0),
                sample("A_x", 2.0),
                sample("B_y", 5.0),
                sample("B_y", 6.0),
                sample("A_x", 3.0),
            ],
            t0(),
        );
        assert_eq!(values(&out), vec![7.0, 9.0]);
    }

    /// Echoes the triggering sample of any telemetry channel.
    struct EchoAll;

    impl MetaChannel for EchoAll {
        fn proto(&self) -> MetaChannelProto {
            MetaChannelProto::new("Echo", 0, DataType::F64)
        }
        fn watching(&self) -> Vec<String> {
            Vec::new()
        }
        fn watches_everything(&self) -> bool {
            true
        }
        fn update_behavior(&self) -> UpdateBehavior {
            UpdateBehavior::All
        }
        fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
            let trigger = inputs.trigger()?.clone();
            let value = trigger.value.as_f64()?;
            Some(Calculation::new(value, vec![trigger]))
        }
    }

    #[test]
    fn all_over_everything_waits_for_every_seen_channel() {
        let module = MetaModule::new("Echo", 0xA100, vec![Box::new(EchoAll) as Box<dyn MetaChannel>]).expect("module");
        let mut runtime = MetaRuntime::new(vec![module], 5);
        let out = runtime.evaluate(
            vec![sample("A_x", 1.0), sample("B_y", 2.0), sample("B_y", 3.0), sample("A_x", 4.0)],
            t0(),
        );
        assert_eq!(values(&out), vec![1.0, 4.0]);
    }

    #[test]
    fn min_values_and_min_interval_gate_firing() {
        let options = ChannelOptions {
            cache_depth: 2,
            min_values: 2,
            min_interval: Some(Duration::from_secs(10)),
        };
        let module = MetaModule::new(
            "Test",
            0xA100,
            vec![Sum::with_options(0, &["A_x"], UpdateBehavior::Any, options)],
        )
        .expect("module");
        let mut runtime = MetaRuntime::new(vec![module], 5);

        assert!(runtime.evaluate(vec![sample("A_x", 1.0)], t0()).is_empty());
        assert_eq!(runtime.evaluate(vec![sample("A_x", 2.0)], t0()).len(), 1);
        let soon = t0() + chrono::Duration::seconds(3);
        assert!(runtime.evaluate(vec![sample("A_x", 3.0)], soon).is_empty());
        let later = t0() + chrono::Duration::seconds(10);
        assert_eq!(runtime.evaluate(vec![sample("A_x", 4.0)], later).len(), 1);
    }

    #[test]
    fn meta_of_meta_recurses_until_the_depth_limit() {
        let chain = |depth| {
            let module = MetaModule::new(
                "Chain",
                0xA100,
                vec![
                    Sum::boxed(0, &["A_x"], UpdateBehavior::Any),
                    Sum::boxed(1, &["MetaModChain_Sum0"], UpdateBehavior::Any),
                    Sum::boxed(2, &["MetaModChain_Sum1"], UpdateBehavior::Any),
                ],
            )
            .expect("module");
            MetaRuntime::new(vec![module], depth)
        };

        let out = chain(5).evaluate(vec![sample("A_x", 1.0)], t0());
        let names: Vec<&str> = out.iter().map(|e| e.channel.as_str()).collect();
        assert_eq!(names, ["MetaModChain_Sum0", "MetaModChain_Sum1", "MetaModChain_Sum2"]);

        let out = chain(2).evaluate(vec![sample("A_x", 1.0)], t0());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn time_only_fires_on_ticks_only() {
        let options = ChannelOptions {
            min_interval: Some(Duration::from_secs(1)),
            ..ChannelOptions::default()
        };
        let module = MetaModule::new(
            "Clock",
            0xA100,
            vec![Sum::with_options(0, &["A_x"], UpdateBehavior::TimeOnly, options)],
        )
        .expect("module");
        let mut runtime = MetaRuntime::new(vec![module], 5);
        assert!(runtime.evaluate(vec![sample("A_x", 4.0)], t0()).is_empty());
        assert_eq!(values(&runtime.tick(t0())), vec![4.0]);
        assert!(runtime.tick(t0() + chrono::Duration::milliseconds(500)).is_empty());
        assert_eq!(runtime.tick(t0() + chrono::Duration::seconds(1)).len(), 1);
    }

    #[test]
    fn bad_definitions_are_rejected() {
        let err = MetaModule::new("Clock", 0xA100, vec![Sum::boxed(0, &["A_x"], UpdateBehavior::TimeOnly)])
            .expect_err("time-only without interval");
        assert!(matches!(err, DownlinkError::Meta(_)));

        let too_many: Vec<Box<dyn MetaChannel>> = (0..256)
            .map(|i| Sum::boxed((i % 256) as u8, &["A_x"], UpdateBehavior::Any))
            .collect();
        assert!(MetaModule::new("Wide", 0xA100, too_many).is_err());

        let options = ChannelOptions {
            cache_depth: 1,
            min_values: 3,
            min_interval: None,
        };
        assert!(MetaModule::new(
            "Shallow",
            0xA100,
            vec![Sum::with_options(0, &["A_x"], UpdateBehavior::Any, options)]
        )
        .is_err());
    }

    #[test]
    fn downlink_times_come_from_the_newest_consulted_sample() {
        let at = |s: i64| t0() + chrono::Duration::seconds(s);
        let mut old = sample("A_x", 1.0);
        old.downlink_times = Some(DownlinkTimes {
            lander_rx: Some(at(50)),
            ..DownlinkTimes::received_at(at(60))
        });
        let mut new = sample("B_y", 1.0);
        new.downlink_times = Some(DownlinkTimes {
            scet_est: Some(at(10)),
            ..DownlinkTimes::received_at(at(20))
        });

        // scet_est takes precedence over a later lander_rx.
        assert_eq!(inherited_downlink_times(&[old.clone(), new.clone()], at(99)), new.downlink_times.unwrap());
        assert_eq!(inherited_downlink_times(&[old.clone()], at(99)), old.downlink_times.unwrap());

        let bare = inherited_downlink_times(&[sample("A_x", 1.0)], at(99));
        assert_eq!(bare.scet_est, Some(at(99)));
        assert_eq!(bare.pmcc_rx, Some(at(99)));
        assert_eq!(bare.lander_rx, None);
    }

    #[test]
    fn declarations_carry_watch_lists_with_the_prefix() {
        let module = MetaModule::new("MetaModTest", 0xA100, vec![Sum::boxed(3, &["B_y", "A_x"], UpdateBehavior::All)])
            .expect("module");
        let decl = module.decl();
        assert_eq!(decl.name, "MetaModTest");
        assert_eq!(decl.channels[0].id, 3);
        assert_eq!(decl.channels[0].watching, vec!["A_x".to_string(), "B_y".to_string()]);
    }
}
