//! Simulated EtherNet/IP controller.
//!
//! Serves a table of generated tag values so the bridge can run end to end
//! without hardware. Every read produces fresh values.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use tagbridge_framework::{
    BridgeError, RawRead, ReadTarget, Result, TagConnection, TagReader, TagValue,
};

/// How a simulated tag produces values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SimulatedTag {
    /// REAL around `base`, varying by up to `spread` either way.
    Real { base: f64, spread: f64 },
    /// DINT drawn uniformly from `min..=max`.
    Int { min: i64, max: i64 },
    /// DINT increasing by `step` on every read, wrapping at `wrap`.
    Counter {
        #[serde(default)]
        start: i64,
        #[serde(default = "default_step")]
        step: i64,
        #[serde(default = "default_wrap")]
        wrap: i64,
    },
    /// BOOL that is true with probability `true_ratio`.
    Bool {
        #[serde(default = "default_true_ratio")]
        true_ratio: f64,
    },
    /// A constant value.
    Fixed { value: TagValue },
}

fn default_step() -> i64 {
    1
}

fn default_wrap() -> i64 {
    10_000
}

fn default_true_ratio() -> f64 {
    0.5
}

impl SimulatedTag {
    fn validate(&self, name: &str) -> Result<()> {
        let invalid =
            |msg: &str| Err(BridgeError::validation(format!("Simulated tag '{}': {}", name, msg)));

        match self {
            SimulatedTag::Real { base, spread } => {
                if !base.is_finite() || !spread.is_finite() || *spread < 0.0 {
                    return invalid("base and spread must be finite, spread >= 0");
                }
            }
            SimulatedTag::Int { min, max } if min > max => return invalid("min must be <= max"),
            SimulatedTag::Counter { step, wrap, .. } if *wrap <= 0 || *step < 0 => {
                return invalid("wrap must be > 0 and step >= 0");
            }
            SimulatedTag::Bool { true_ratio } if !(0.0..=1.0).contains(true_ratio) => {
                return invalid("true_ratio must be within 0..=1");
            }
            _ => {}
        }

        Ok(())
    }
}

/// Simulator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Tag table served to every device.
    #[serde(default = "default_tags")]
    pub tags: IndexMap<String, SimulatedTag>,

    /// Hosts whose connections are refused.
    #[serde(default)]
    pub unreachable_hosts: Vec<String>,

    /// Delay added to every connection, in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,

    /// Seed for reproducible values.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tags: default_tags(),
            unreachable_hosts: Vec::new(),
            latency_ms: 0,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, tag) in &self.tags {
            tag.validate(name)?;
        }
        Ok(())
    }
}

/// Tag table of a typical packaging line controller.
pub fn default_tags() -> IndexMap<String, SimulatedTag> {
    let real = |base, spread| SimulatedTag::Real { base, spread };
    let int = |min, max| SimulatedTag::Int { min, max };
    let flag = |true_ratio| SimulatedTag::Bool { true_ratio };

    [
        ("Tag1", real(100.0, 5.0)),
        ("Tag2", real(25.0, 2.0)),
        ("Tag3", int(40, 45)),
        ("Temperature", real(72.0, 3.0)),
        ("Pressure", real(14.7, 0.5)),
        ("Speed", int(1400, 1600)),
        ("Status", flag(2.0 / 3.0)),
        (
            "Counter",
            SimulatedTag::Counter {
                start: 0,
                step: 1,
                wrap: 10_000,
            },
        ),
        ("Motor_Running", flag(2.0 / 3.0)),
        ("Voltage", real(220.0, 10.0)),
        ("Flow_Rate", real(45.0, 5.0)),
        ("Alarm", flag(0.25)),
        (
            "Production_Count",
            SimulatedTag::Counter {
                start: 1234,
                step: 3,
                wrap: 100_000,
            },
        ),
    ]
    .into_iter()
    .map(|(name, tag)| (name.to_string(), tag))
    .collect()
}

struct Generator {
    rng: StdRng,
    counters: HashMap<String, i64>,
}

impl Generator {
    fn generate(&mut self, name: &str, tag: &SimulatedTag) -> TagValue {
        match tag {
            SimulatedTag::Real { base, spread } => {
                let value = if *spread > 0.0 {
                    base + self.rng.gen_range(-spread..=*spread)
                } else {
                    *base
                };
                TagValue::Real((value * 100.0).round() / 100.0)
            }
            SimulatedTag::Int { min, max } => TagValue::Int(self.rng.gen_range(*min..=*max)),
            SimulatedTag::Counter { start, step, wrap } => {
                let counter = self.counters.entry(name.to_string()).or_insert(*start);
                let value = counter.rem_euclid(*wrap);
                // Widened so a large step cannot overflow before wrapping.
                *counter = ((i128::from(value) + i128::from(*step)) % i128::from(*wrap)) as i64;
                TagValue::Int(value)
            }
            SimulatedTag::Bool { true_ratio } => TagValue::Bool(self.rng.gen_bool(*true_ratio)),
            SimulatedTag::Fixed { value } => value.clone(),
        }
    }
}

struct Inner {
    tags: IndexMap<String, SimulatedTag>,
    unreachable: HashSet<String>,
    latency: Duration,
    generator: Mutex<Generator>,
}

/// [`TagReader`] serving simulated values.
#[derive(Clone)]
pub struct SimulatedReader {
    inner: Arc<Inner>,
}

impl SimulatedReader {
    pub fn new(config: &SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            tags = config.tags.len(),
            unreachable = config.unreachable_hosts.len(),
            "Simulated controller ready"
        );

        Self {
            inner: Arc::new(Inner {
                tags: config.tags.clone(),
                unreachable: config.unreachable_hosts.iter().cloned().collect(),
                latency: Duration::from_millis(config.latency_ms),
                generator: Mutex::new(Generator {
                    rng,
                    counters: HashMap::new(),
                }),
            }),
        }
    }

    /// Names of the tags the simulator serves.
    pub fn tag_names(&self) -> Vec<String> {
        self.inner.tags.keys().cloned().collect()
    }
}

#[async_trait]
impl TagReader for SimulatedReader {
    async fn open(&self, target: &ReadTarget, timeout: Duration) -> Result<Box<dyn TagConnection>> {
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency.min(timeout)).await;
        }

        if self.inner.unreachable.contains(&target.host) {
            return Err(BridgeError::reader(format!(
                "connection to {} refused",
                target
            )));
        }

        Ok(Box::new(SimulatedConnection {
            inner: self.inner.clone(),
        }))
    }
}

struct SimulatedConnection {
    inner: Arc<Inner>,
}

#[async_trait]
impl TagConnection for SimulatedConnection {
    async fn read_batch(&mut self, tags: &[String]) -> Result<Vec<RawRead>> {
        let mut generator = self.inner.generator.lock();

        Ok(tags
            .iter()
            .map(|name| match self.inner.tags.get(name) {
                Some(tag) => RawRead {
                    tag: name.clone(),
                    value: Some(generator.generate(name, tag)),
                },
                None => RawRead::failed(name.clone()),
            })
            .collect())
    }

    async fn close(&mut self) {}
}
