//! Drive scenario steps through the hooks with scripted transports, then let the
//! native host claim each wire request the way a URL interceptor would.

use std::sync::Arc;

use anyhow::Result;
use relay_core::{
    BeaconTransport, Dispatch, FormData, FormTransport, HookError, HookedBeacon, HookedForm,
    HookedHttpRequest, HttpTransport, RelayContext, RequestBody, TransportError,
};
use serde::Serialize;
use serde_json::Value;

use crate::native::NativeHost;
use crate::scenario::{self, Step};

/// One output line per scenario step.
#[derive(Debug, Serialize)]
pub struct Report {
    pub index: usize,
    pub transport: &'static str,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// URL the request went out on, if it went out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire_url: Option<String>,
    /// URL the native host recovered by stripping the marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    /// Body the native host matched to the wire request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
struct ScriptedXhr {
    opened: Option<String>,
    wire_url: Option<String>,
}

impl HttpTransport for ScriptedXhr {
    fn open(&mut self, _method: &str, url: &str, _is_async: bool) -> Result<(), TransportError> {
        self.opened = Some(url.to_string());
        Ok(())
    }

    fn send(&mut self, _body: RequestBody) -> Result<(), TransportError> {
        let url = self
            .opened
            .clone()
            .ok_or_else(|| TransportError("send before open".into()))?;
        self.wire_url = Some(url);
        Ok(())
    }
}

struct ScriptedForm {
    action: String,
    method: String,
    enctype: String,
    fields: FormData,
    wire_url: Option<String>,
}

impl FormTransport for ScriptedForm {
    fn action(&self) -> String {
        self.action.clone()
    }
    fn set_action(&mut self, action: String) {
        self.action = action;
    }
    fn method(&self) -> String {
        self.method.clone()
    }
    fn enctype(&self) -> String {
        self.enctype.clone()
    }
    fn form_data(&self) -> FormData {
        self.fields.clone()
    }
    fn submit(&mut self) -> Result<(), TransportError> {
        self.wire_url = Some(self.action.clone());
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedBeacon {
    wire_url: Option<String>,
}

impl BeaconTransport for ScriptedBeacon {
    fn send_beacon(&mut self, url: &str, _body: RequestBody) -> Result<bool, TransportError> {
        self.wire_url = Some(url.to_string());
        Ok(true)
    }
}

/// Run one step to completion.
pub async fn run_step(
    index: usize,
    step: Step,
    ctx: Arc<RelayContext>,
    host: Arc<NativeHost>,
) -> Result<Report> {
    let transport = step.transport();
    let (result, wire_url) = match step {
        Step::Xhr {
            method,
            url,
            is_async,
            body,
        } => {
            let body = body.into_body()?;
            let mut xhr = HookedHttpRequest::new(ctx.clone(), ScriptedXhr::default());
            let result = match xhr.open(&method, &url, is_async) {
                Ok(()) => xhr.send(body).await,
                Err(e) => Err(e),
            };
            (result, xhr.into_inner().wire_url)
        }
        Step::Form {
            action,
            method,
            enctype,
            fields,
        } => {
            let form = ScriptedForm {
                action,
                method,
                enctype,
                fields: scenario::form_data(fields)?,
                wire_url: None,
            };
            let mut hooked = HookedForm::new(ctx.clone(), form);
            let result = hooked.submit().await;
            (result, hooked.inner().wire_url.clone())
        }
        Step::Beacon { url, body } => {
            let body = body.into_body()?;
            let mut beacon = HookedBeacon::new(ctx.clone(), ScriptedBeacon::default());
            let result = beacon.send_beacon(&url, body).await.map(|o| o.dispatch);
            (result, beacon.inner().wire_url.clone())
        }
    };

    let mut report = Report {
        index,
        transport,
        outcome: "error",
        request_id: None,
        wire_url: None,
        original_url: None,
        cached_body: None,
        error: None,
    };
    match result {
        Ok(dispatch) => {
            report.outcome = match &dispatch {
                Dispatch::Passthrough => "passthrough",
                Dispatch::HandedOff(_) => "handed_off",
                Dispatch::Unrelayed(_) => "unrelayed",
            };
            if let Dispatch::HandedOff(id) | Dispatch::Unrelayed(id) = &dispatch {
                report.request_id = Some(id.to_string());
            }
        }
        Err(e) => {
            if let HookError::BodyRead { id, .. }
            | HookError::RelayUnavailable { id, .. }
            | HookError::Payload { id, .. }
            | HookError::Abandoned(id) = &e
            {
                report.request_id = Some(id.to_string());
            }
            report.error = Some(e.to_string());
        }
    }
    if let Some(url) = wire_url {
        let (original, cached) = host.claim(&url, &ctx.config().marker_name);
        report.original_url = Some(original);
        report.cached_body = cached.and_then(|p| p.get("value").cloned());
        report.wire_url = Some(url);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::BodySpec;
    use relay_core::{HookConfig, RelayMode};
    use std::time::Duration;

    fn setup(config: HookConfig) -> (Arc<RelayContext>, Arc<NativeHost>) {
        let host = Arc::new(NativeHost::new(
            &config.bridge_module,
            &config.bridge_method,
            Duration::from_millis(1),
        ));
        let ctx = RelayContext::new(config, host.clone(), "https://app.example.com/");
        (ctx, host)
    }

    #[tokio::test]
    async fn xhr_post_handed_off_and_claimed() {
        let (ctx, host) = setup(HookConfig::default());
        let step = Step::Xhr {
            method: "POST".into(),
            url: "https://api.example.com/submit?x=1".into(),
            is_async: true,
            body: BodySpec::Text {
                value: "hello".into(),
            },
        };
        let report = run_step(0, step, ctx, host.clone()).await.unwrap();
        assert_eq!(report.outcome, "handed_off");
        let id = report.request_id.unwrap();
        assert_eq!(
            report.wire_url.as_deref(),
            Some(format!("https://api.example.com/submit?x=1&BodyRelay-RequestId={}", id).as_str())
        );
        assert_eq!(
            report.original_url.as_deref(),
            Some("https://api.example.com/submit?x=1")
        );
        assert_eq!(report.cached_body, Some(Value::String("hello".into())));
        assert_eq!(host.cached(), 0);
    }

    #[tokio::test]
    async fn get_reports_passthrough() {
        let (ctx, host) = setup(HookConfig::default());
        let step = Step::Xhr {
            method: "GET".into(),
            url: "https://api.example.com/items".into(),
            is_async: true,
            body: BodySpec::None,
        };
        let report = run_step(1, step, ctx, host).await.unwrap();
        assert_eq!(report.outcome, "passthrough");
        assert!(report.request_id.is_none());
        assert!(report.cached_body.is_none());
    }

    #[tokio::test]
    async fn sync_form_submission_claims_form_payload() {
        let config = HookConfig {
            relay_mode: RelayMode::Sync,
            ..HookConfig::default()
        };
        let (ctx, host) = setup(config);
        let step = Step::Form {
            action: "https://forms.example.com/save".into(),
            method: "POST".into(),
            enctype: "multipart/form-data".into(),
            fields: vec![scenario::FieldSpec::Text {
                key: "a".into(),
                value: "1".into(),
            }],
        };
        let report = run_step(2, step, ctx, host).await.unwrap();
        assert_eq!(report.outcome, "handed_off");
        assert_eq!(
            report.cached_body,
            Some(serde_json::json!({ "fileKeys": [], "formData": [["a", "1"]] }))
        );
    }
}
