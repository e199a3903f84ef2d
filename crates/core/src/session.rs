//! Agent gateway session identity and request id generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use rand::Rng;
use serde::{Deserialize, Serialize};

const COUNTER_WRAP: u64 = 1_000_000_000;
const SESSION_ID_MAX: usize = 48;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates request and idempotency ids of the form
/// `<prefix>-<unix millis>-<counter>-<6 base36 chars>`.
///
/// The counter wraps at one billion and is the only mutable state shared
/// between concurrent calls.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

static SHARED_IDS: OnceLock<Arc<IdGenerator>> = OnceLock::new();

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// The process-wide generator.
    pub fn shared() -> Arc<IdGenerator> {
        SHARED_IDS.get_or_init(|| Arc::new(IdGenerator::new())).clone()
    }

    pub fn next_id(&self, prefix: &str) -> String {
        let previous = match self.counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
            Some((c + 1) % COUNTER_WRAP)
        }) {
            Ok(v) | Err(v) => v,
        };
        let sequence = (previous + 1) % COUNTER_WRAP;

        let mut rng = rand::rng();
        let suffix: String = (0..6)
            .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
            .collect();

        format!(
            "{prefix}-{}-{sequence}-{suffix}",
            chrono::Utc::now().timestamp_millis()
        )
    }
}

/// Derive the gateway session key for a logical agent identity.
///
/// `agent:<id>:main`, where `<id>` is the lower-cased identity with every
/// character outside `[a-z0-9_-]` replaced by `-`, runs of `-` or `_`
/// collapsed, truncated to 48 characters, and `main` when nothing is left.
pub fn session_key(identity: Option<&str>) -> String {
    let raw = identity.unwrap_or("main").trim().to_lowercase();

    let mut safe = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        if (c == '-' || c == '_') && safe.ends_with(c) {
            continue;
        }
        safe.push(c);
    }
    safe.truncate(SESSION_ID_MAX);

    if safe.is_empty() {
        safe.push_str("main");
    }
    format!("agent:{safe}:main")
}

/// Session identity for one attempt against the agent gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySession {
    /// Stable across turns of the same conversation
    pub session_key: String,
    /// Unique per attempt
    pub idempotency_key: String,
}

impl GatewaySession {
    pub fn new(identity: Option<&str>, ids: &IdGenerator) -> Self {
        Self {
            session_key: session_key(identity),
            idempotency_key: ids.next_id("idem"),
        }
    }
}
