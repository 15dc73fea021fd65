//! Stand-in native host: caches relayed bodies and acknowledges after a delay,
//! then hands a cached body back when it sees the tagged wire request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use relay_core::bridge::ReplyHandler;
use relay_core::url::{extract_query_id, strip_query_marker};
use relay_core::{Bridge, BridgeError};
use serde_json::{json, Value};
use tracing::debug;

pub struct NativeHost {
    module: String,
    method: String,
    ack_delay: Duration,
    cache: Mutex<HashMap<String, Value>>,
}

impl NativeHost {
    pub fn new(module: &str, method: &str, ack_delay: Duration) -> Self {
        Self {
            module: module.to_string(),
            method: method.to_string(),
            ack_delay,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cache the payload under its request id. Returns the id.
    fn store(&self, module: &str, method: &str, payload: Value) -> Result<String, BridgeError> {
        if module != self.module || method != self.method {
            return Err(BridgeError::Rejected(format!(
                "no handler for {}.{}",
                module, method
            )));
        }
        let id = payload
            .get("requestId")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Rejected("payload without requestId".into()))?
            .to_string();
        debug!(request_id = %id, "native host cached body");
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(id.clone(), payload);
        }
        Ok(id)
    }

    /// Intercept a wire request: pull the cached payload for the id in its URL.
    /// Returns the untagged URL and the payload, if one was cached.
    pub fn claim(&self, wire_url: &str, marker: &str) -> (String, Option<Value>) {
        let original = strip_query_marker(wire_url, marker);
        let payload = extract_query_id(wire_url, marker).and_then(|id| {
            self.cache
                .lock()
                .ok()
                .and_then(|mut c| c.remove(id.as_str()))
        });
        (original, payload)
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Bridge for NativeHost {
    fn call(
        &self,
        module: &str,
        method: &str,
        payload: Value,
        on_reply: ReplyHandler,
    ) -> Result<(), BridgeError> {
        let id = self.store(module, method, payload)?;
        let delay = self.ack_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_reply(json!({ "requestId": id }));
        });
        Ok(())
    }

    fn sync_call(&self, module: &str, method: &str, payload: Value) -> Result<Value, BridgeError> {
        let id = self.store(module, method, payload)?;
        Ok(json!({ "requestId": id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn acknowledges_after_delay() {
        let host = NativeHost::new("ajax", "cacheAJAXBody", Duration::from_millis(1));
        let (tx, rx) = oneshot::channel();
        host.call(
            "ajax",
            "cacheAJAXBody",
            json!({ "requestId": "12", "value": "v" }),
            Box::new(move |ack| {
                let _ = tx.send(ack);
            }),
        )
        .unwrap();
        assert_eq!(rx.await.unwrap(), json!({ "requestId": "12" }));
        assert_eq!(host.cached(), 1);
    }

    #[test]
    fn wrong_method_rejected() {
        let host = NativeHost::new("ajax", "cacheAJAXBody", Duration::ZERO);
        assert!(matches!(
            host.sync_call("ajax", "other", json!({ "requestId": "1" })),
            Err(BridgeError::Rejected(_))
        ));
    }

    #[test]
    fn claim_matches_tagged_url() {
        let host = NativeHost::new("ajax", "cacheAJAXBody", Duration::ZERO);
        host.sync_call("ajax", "cacheAJAXBody", json!({ "requestId": "77", "value": "x" }))
            .unwrap();
        let (url, payload) = host.claim("https://a.com/p?q=1&M=77", "M");
        assert_eq!(url, "https://a.com/p?q=1");
        assert_eq!(payload.unwrap()["value"], "x");
        assert_eq!(host.cached(), 0);
        let (_, again) = host.claim("https://a.com/p?q=1&M=77", "M");
        assert!(again.is_none());
    }
}
