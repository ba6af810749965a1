use super::{ConnectOptions, Engine, TransportError};
use tracing::warn;

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.to_lowercase().as_str() {
        "redis" => Some(Engine::Redis),
        "nats" | "jetstream" => Some(Engine::Nats),
        #[cfg(any(test, feature = "gateway-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

/// Collect `KEY=VALUE` connection pairs. A pair without `=` or with an empty
/// key is rejected so a mistyped backend address never silently falls back to
/// the default one. Later pairs override earlier ones.
pub fn parse_connect_kv(pairs: &[String]) -> Result<ConnectOptions, TransportError> {
    let mut opts = ConnectOptions::default();
    for p in pairs {
        let Some((k, v)) = p.split_once('=') else {
            return Err(TransportError::Connect(format!(
                "malformed connect option {p:?}, expected KEY=VALUE"
            )));
        };
        let key = k.trim();
        if key.is_empty() {
            return Err(TransportError::Connect(format!(
                "connect option {p:?} has an empty key"
            )));
        }
        if let Some(previous) = opts.params.insert(key.to_string(), v.trim().to_string()) {
            warn!(key, previous = %previous, "connect option given twice, keeping the last value");
        }
    }
    Ok(opts)
}
