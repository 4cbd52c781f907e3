use log::kv;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};

/// # NDOC
/// component: `utils::logger`
/// purpose: JSON-lines logging for extraction runs. One object per record:
///   timestamp, level, component (the log target), message, and a nested
///   `fields` object holding whatever key-values the call site attached.
/// invariants:
///   - Run correlation is explicit: call sites pass `run_id` as a key-value.
///     One process may drive several runs concurrently, so there is no
///     ambient run state.
struct EngineLogger;

/// Collects key-values into a JSON object, keeping numeric and boolean
/// values typed instead of stringifying everything.
struct FieldMap(Map<String, Value>);

impl<'kvs> kv::Visitor<'kvs> for FieldMap {
    fn visit_pair(&mut self, key: kv::Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        let rendered = if let Some(b) = value.to_bool() {
            json!(b)
        } else if let Some(n) = value.to_u64() {
            json!(n)
        } else if let Some(n) = value.to_f64() {
            json!(n)
        } else {
            json!(value.to_string())
        };
        self.0.insert(key.as_str().to_string(), rendered);
        Ok(())
    }
}

impl Log for EngineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut fields = FieldMap(Map::new());
        if record.key_values().visit(&mut fields).is_err() {
            fields
                .0
                .insert("fields_error".to_string(), json!("unrenderable key-values"));
        }

        let mut line = Map::new();
        line.insert("ts".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        line.insert("level".to_string(), json!(record.level().as_str()));
        line.insert("component".to_string(), json!(record.target()));
        line.insert("message".to_string(), json!(record.args().to_string()));
        if !fields.0.is_empty() {
            line.insert("fields".to_string(), Value::Object(fields.0));
        }
        println!("{}", Value::Object(line));
    }

    fn flush(&self) {}
}

static LOGGER: EngineLogger = EngineLogger;
static INSTALL_ONCE: OnceCell<()> = OnceCell::new();

/// Installs the JSON-lines logger at `info`. Call once at startup.
pub fn init_logger() -> Result<(), SetLoggerError> {
    init_logger_with_level(LevelFilter::Info)
}

pub fn init_logger_with_level(level: LevelFilter) -> Result<(), SetLoggerError> {
    INSTALL_ONCE
        .get_or_try_init(|| {
            log::set_logger(&LOGGER)?;
            log::set_max_level(level);
            Ok(())
        })
        .map(|_| ())
}

// --- Domain events the engine emits ---

/// One line per gate evaluation: the running quality score and whether the
/// pipeline canonicalizes now or moves to the next phase.
pub fn log_gate_decision(run_id: &str, phase: u8, score: f64, decision: &str) {
    log::info!(
        target: "orchestrator",
        run_id = run_id,
        phase = phase,
        score = score,
        decision = decision;
        "gate evaluated"
    );
}

/// Emitted when a budget cap stops the run early.
pub fn log_budget_stop(run_id: &str, reason: &str, spent_usd: f64) {
    log::warn!(
        target: "orchestrator",
        run_id = run_id,
        reason = reason,
        spent_usd = spent_usd;
        "budget exhausted"
    );
}

/// Accounting line for every LLM-assisted step, successful or not.
pub fn log_llm_accounting(component: &str, purpose: &str, attempts: u32, cost_usd: f64) {
    log::info!(
        target: component,
        purpose = purpose,
        attempts = attempts,
        cost_usd = cost_usd;
        "llm call settled"
    );
}
