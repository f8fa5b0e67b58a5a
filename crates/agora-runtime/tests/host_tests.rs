#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agora_config::AgoraConfig;
    use agora_core::rpc::codes;
    use agora_core::{AgoraError, Params, Result, RpcRequest, RpcResponse};
    use agora_runtime::mock::MockTransport;
    use agora_runtime::{
        Agent, AgentContext, AgentHost, AgentType, Capability, MonitorFeature, Origin, Poll, Push,
        TypeTag, str_param,
    };
    use agora_state::MemoryStateFactory;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    const BASE: &str = "http://localhost:3800";

    // ── Agent types ────────────────────────────────────────────

    struct Counter;

    #[async_trait]
    impl Agent for Counter {
        fn description(&self) -> String {
            "Counts and announces changes".into()
        }

        async fn invoke(&self, ctx: &AgentContext, method: &str, params: Params) -> Result<Value> {
            match method {
                "increment" => {
                    let by = params.get("by").and_then(Value::as_i64).unwrap_or(1);
                    let value = ctx.state().get_as::<i64>("count")?.unwrap_or(0) + by;
                    ctx.state().put("count", json!(value))?;
                    ctx.trigger("changed", json!({"value": value})).await?;
                    Ok(json!(value))
                }
                "get" => Ok(json!(ctx.state().get_as::<i64>("count")?.unwrap_or(0))),
                "reset" => {
                    ctx.state().put("count", json!(0))?;
                    Ok(Value::Null)
                }
                "callAsync" => {
                    let url = str_param(&params, method, "url")?;
                    ctx.send_async(&url, "get", json!({}), "onReply").await?;
                    Ok(Value::Null)
                }
                "onReply" => {
                    ctx.state().put("lastReply", Value::Object(params))?;
                    Ok(Value::Null)
                }
                "fail" => Err(AgoraError::application("counter jammed")),
                other => Err(AgoraError::MethodNotFound(other.to_string())),
            }
        }
    }

    impl AgentType for Counter {
        const TYPE_NAME: &'static str = "Counter";

        fn capabilities() -> Vec<Capability> {
            vec![
                Capability::new("increment")
                    .optional("by", TypeTag::Integer)
                    .returns(TypeTag::Integer),
                Capability::new("get").returns(TypeTag::Integer),
                Capability::new("reset").private(),
                Capability::new("callAsync").param("url", TypeTag::String),
                Capability::packed("onReply", "reply"),
                Capability::new("fail"),
            ]
        }

        fn create() -> Self {
            Counter
        }
    }

    struct Listener;

    #[async_trait]
    impl Agent for Listener {
        async fn invoke(&self, ctx: &AgentContext, method: &str, params: Params) -> Result<Value> {
            match method {
                "onChanged" => {
                    let mut seen = ctx
                        .state()
                        .get_as::<Vec<Value>>("seen")?
                        .unwrap_or_default();
                    seen.push(Value::Object(params));
                    ctx.state().put_as("seen", &seen)?;
                    Ok(Value::Null)
                }
                other => Err(AgoraError::MethodNotFound(other.to_string())),
            }
        }
    }

    impl AgentType for Listener {
        const TYPE_NAME: &'static str = "Listener";

        fn capabilities() -> Vec<Capability> {
            vec![Capability::packed("onChanged", "notification")]
        }

        fn create() -> Self {
            Listener
        }
    }

    struct Dashboard;

    #[async_trait]
    impl Agent for Dashboard {
        async fn invoke(&self, ctx: &AgentContext, method: &str, params: Params) -> Result<Value> {
            match method {
                "onValue" => {
                    let value = params.get("result").cloned().unwrap_or(Value::Null);
                    ctx.state().put("lastValue", value)?;
                    Ok(Value::Null)
                }
                other => Err(AgoraError::MethodNotFound(other.to_string())),
            }
        }
    }

    impl AgentType for Dashboard {
        const TYPE_NAME: &'static str = "Dashboard";

        fn capabilities() -> Vec<Capability> {
            vec![Capability::new("onValue").optional("result", TypeTag::Any).private()]
        }

        fn create() -> Self {
            Dashboard
        }
    }

    // ── Fixture ────────────────────────────────────────────────

    fn host() -> Arc<AgentHost> {
        let mut config = AgoraConfig::default();
        config.host.public_url = Some(BASE.into());
        config.monitor.cas_initial_backoff_ms = 1;
        let states = Arc::new(MemoryStateFactory::new(Some(BASE.into())));
        let host = AgentHost::new(&config, states, Arc::new(MockTransport::new()));
        host.register::<Counter>();
        host.register::<Listener>();
        host.register::<Dashboard>();
        host
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest::from_value(method, params).unwrap()
    }

    fn error_code(response: &RpcResponse) -> i64 {
        response.error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    fn url(agent_type: &str, agent_id: &str) -> String {
        format!("{}/agents/{}/{}/", BASE, agent_type, agent_id)
    }

    /// Poll `check` until it holds or two seconds pass.
    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    // ── Dispatch ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_dispatch_creates_agent_on_first_use() {
        let host = host();
        let response = host
            .dispatch_to("Counter", "c1", request("increment", json!({"by": 2})), Origin::Remote)
            .await;
        assert_eq!(response.result, Some(json!(2)));
        let response = host
            .dispatch_to("Counter", "c1", request("get", json!({})), Origin::Remote)
            .await;
        assert_eq!(response.result, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_response_echoes_request_id() {
        let host = host();
        let mut req = request("get", json!({}));
        req.id = Some(json!(7));
        let response = host.dispatch_to("Counter", "c1", req, Origin::Remote).await;
        assert_eq!(response.id, Some(json!(7)));

        let mut req = request("nope", json!({}));
        req.id = Some(json!("x"));
        let response = host.dispatch_to("Counter", "c1", req, Origin::Remote).await;
        assert_eq!(response.id, Some(json!("x")));
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_error_codes() {
        let host = host();
        let cases = [
            ("Counter", "nope", json!({}), codes::METHOD_NOT_FOUND),
            ("Counter", "reset", json!({}), codes::ACCESS_DENIED),
            ("Counter", "trigger", json!({"event": "changed"}), codes::ACCESS_DENIED),
            ("Counter", "increment", json!({"by": "two"}), codes::INVALID_PARAMS),
            ("Counter", "callAsync", json!({}), codes::INVALID_PARAMS),
            ("Counter", "fail", json!({}), codes::APPLICATION_ERROR),
            ("Ghost", "get", json!({}), codes::NOT_FOUND),
        ];
        for (agent_type, method, params, code) in cases {
            let response = host
                .dispatch_to(agent_type, "c1", request(method, params), Origin::Remote)
                .await;
            assert_eq!(error_code(&response), code, "{agent_type}.{method}");
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_missing_agent_does_not_create() {
        let host = host();
        let response = host.dispatch("c9", request("get", json!({})), Origin::Remote).await;
        assert_eq!(error_code(&response), codes::NOT_FOUND);
        assert!(!host.states().exists("c9").unwrap());
    }

    #[tokio::test]
    async fn test_private_capability_is_local_only() {
        let host = host();
        host.create_agent("Counter", "c1").await.unwrap();
        let response = host.dispatch("c1", request("reset", json!({})), Origin::Remote).await;
        assert_eq!(error_code(&response), codes::ACCESS_DENIED);

        let response = host.dispatch("c1", request("reset", json!({})), Origin::Local).await;
        assert!(!response.is_error());
        assert_eq!(host.call_local("c1", "reset", Params::new()).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_not_found() {
        let host = host();
        host.create_agent("Counter", "shared").await.unwrap();
        let response = host
            .dispatch_to("Listener", "shared", request("getId", json!({})), Origin::Remote)
            .await;
        assert_eq!(error_code(&response), codes::NOT_FOUND);
        assert!(host.resolve_or_create("Listener", "shared").await.is_err());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let host = host();
        host.create_agent("Counter", "c1").await.unwrap();
        assert!(host.create_agent("Counter", "c1").await.is_err());
        assert!(matches!(
            host.create_agent("Ghost", "g1").await,
            Err(AgoraError::NotFound(_))
        ));
    }

    // ── Built-ins ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_identity_builtins() {
        let host = host();
        let ctx = host.create_agent("Counter", "c1").await.unwrap();
        assert_eq!(ctx.id(), "c1");
        assert_eq!(ctx.url().unwrap(), url("Counter", "c1"));

        let get = |method: &'static str| {
            let host = Arc::clone(&host);
            async move {
                host.dispatch("c1", request(method, json!({})), Origin::Remote)
                    .await
                    .result
            }
        };
        assert_eq!(get("getId").await, Some(json!("c1")));
        assert_eq!(get("getType").await, Some(json!("Counter")));
        assert_eq!(get("getUrl").await, Some(json!(url("Counter", "c1"))));
        assert_eq!(get("getDescription").await, Some(json!("Counts and announces changes")));
        assert_eq!(get("getVersion").await, Some(json!("1.0")));
    }

    #[tokio::test]
    async fn test_get_methods() {
        let host = host();
        host.create_agent("Counter", "c1").await.unwrap();

        let response = host
            .dispatch("c1", request("getMethods", json!({})), Origin::Remote)
            .await;
        let listed = response.result.unwrap();
        let strings: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(strings.contains(&"Integer increment([Integer by])"));
        assert!(!strings.iter().any(|s| s.contains("onPushTick")));

        let response = host
            .dispatch("c1", request("getMethods", json!({"asJSON": true})), Origin::Remote)
            .await;
        let listed = response.result.unwrap();
        let get = listed
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["method"] == "get")
            .unwrap();
        assert_eq!(get["result"]["type"], "Integer");
    }

    #[tokio::test]
    async fn test_agent_types_are_sorted() {
        let host = host();
        assert_eq!(host.agent_types(), vec!["Counter", "Dashboard", "Listener"]);
        assert!(host.capabilities("Counter").unwrap().get("increment").is_some());
        assert!(host.capabilities("Ghost").is_none());
    }

    // ── Messaging ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_between_local_agents() {
        let host = host();
        let a = host.create_agent("Counter", "a").await.unwrap();
        host.create_agent("Counter", "b").await.unwrap();

        let value: i64 = a
            .send_as(&url("Counter", "b"), "increment", json!({"by": 5}))
            .await
            .unwrap();
        assert_eq!(value, 5);

        // Private methods stay private between agents.
        let err = a.send(&url("Counter", "b"), "reset", json!({})).await.unwrap_err();
        assert!(matches!(err, AgoraError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_async_call_answers_through_callback() {
        let host = host();
        let a = host.create_agent("Counter", "a").await.unwrap();
        let b = host.create_agent("Counter", "b").await.unwrap();
        b.state().put("count", json!(41)).unwrap();

        let response = host
            .dispatch(
                "a",
                request("callAsync", json!({"url": url("Counter", "b")})),
                Origin::Remote,
            )
            .await;
        assert_eq!(response.result, Some(Value::Null));

        assert!(eventually(|| a.state().has("lastReply").unwrap()).await);
        assert_eq!(a.state().get("lastReply").unwrap(), Some(json!({"result": 41})));
    }

    #[tokio::test]
    async fn test_callback_request_answers_immediately() {
        let host = host();
        let listener = host.create_agent("Counter", "l").await.unwrap();
        host.create_agent("Counter", "c1").await.unwrap();

        let req = request("fail", json!({})).with_callback(url("Counter", "l"), "onReply");
        let response = host.dispatch("c1", req, Origin::Remote).await;
        assert_eq!(response.result, Some(Value::Null));

        assert!(eventually(|| listener.state().has("lastReply").unwrap()).await);
        let reply = listener.state().get("lastReply").unwrap().unwrap();
        assert_eq!(reply["error"]["code"], codes::APPLICATION_ERROR);
    }

    // ── Events ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_trigger_reaches_local_subscriber() {
        let host = host();
        let counter = host.create_agent("Counter", "c1").await.unwrap();
        let listener = host.create_agent("Listener", "l1").await.unwrap();
        listener
            .subscribe(&url("Counter", "c1"), "changed", "onChanged")
            .await
            .unwrap();
        assert_eq!(counter.subscriptions().subscribers("changed").unwrap().len(), 1);

        host.dispatch("c1", request("increment", json!({})), Origin::Remote).await;

        assert!(eventually(|| listener.state().has("seen").unwrap()).await);
        let seen = listener.state().get("seen").unwrap().unwrap();
        assert_eq!(
            seen,
            json!([{
                "agent": url("Counter", "c1"),
                "event": "changed",
                "params": {"value": 1},
            }])
        );

        listener
            .unsubscribe(&url("Counter", "c1"), "changed", "onChanged")
            .await
            .unwrap();
        assert!(counter.subscriptions().subscribers("changed").unwrap().is_empty());
    }

    // ── Monitors ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_event_push_updates_monitor() {
        let host = host();
        host.create_agent("Counter", "c1").await.unwrap();
        let dash = host.create_agent("Dashboard", "d1").await.unwrap();

        let mut monitor = dash.create_monitor(&url("Counter", "c1"), "get", json!({}), Some("onValue"));
        let engine = dash.monitors();
        engine
            .attach(&mut monitor, MonitorFeature::Cache("latest".into()))
            .await
            .unwrap();
        engine
            .attach(&mut monitor, MonitorFeature::Push(Push::on_event("changed")))
            .await
            .unwrap();
        assert_eq!(monitor.remote_ids.len(), 1);
        engine.store(&monitor).await.unwrap();

        host.dispatch("c1", request("increment", json!({"by": 3})), Origin::Remote).await;

        assert!(eventually(|| dash.state().get("lastValue").unwrap() == Some(json!(3))).await);
        let cache = engine.cache(&monitor.id).unwrap();
        assert_eq!(cache.get(None), Some(json!(3)));
        assert_eq!(dash.monitor_result(&monitor.id, None).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_monitor_push_with_foreign_push_id_is_refused() {
        let host = host();
        let dash = host.create_agent("Dashboard", "d1").await.unwrap();
        let mut monitor = dash.create_monitor(&url("Counter", "c1"), "get", json!({}), Some("onValue"));
        dash.monitors()
            .attach(&mut monitor, MonitorFeature::Cache("latest".into()))
            .await
            .unwrap();
        dash.monitors().store(&monitor).await.unwrap();

        let forged = request(
            "onMonitorPush",
            json!({"monitorId": monitor.id, "pushId": "made-up", "result": 666}),
        );
        let response = host.dispatch("d1", forged, Origin::Remote).await;
        assert_eq!(error_code(&response), codes::ACCESS_DENIED);
        assert!(dash.state().get("lastValue").unwrap().is_none());
        assert_eq!(dash.monitors().cache(&monitor.id).unwrap().get(None), None);
    }

    #[tokio::test]
    async fn test_interval_push_updates_monitor() {
        let host = host();
        let counter = host.create_agent("Counter", "c1").await.unwrap();
        counter.state().put("count", json!(9)).unwrap();
        let dash = host.create_agent("Dashboard", "d1").await.unwrap();

        let mut monitor = dash.create_monitor(&url("Counter", "c1"), "get", Value::Null, Some("onValue"));
        dash.monitors()
            .add_push(&mut monitor, Push::every(Duration::from_millis(30)))
            .await;
        dash.monitors().store(&monitor).await.unwrap();
        assert_eq!(host.scheduler().len(), 1);

        assert!(eventually(|| dash.state().get("lastValue").unwrap() == Some(json!(9))).await);

        dash.monitors().delete(&monitor).await.unwrap();
        assert!(eventually(|| host.scheduler().is_empty()).await);
    }

    #[tokio::test]
    async fn test_poll_updates_monitor() {
        let host = host();
        let counter = host.create_agent("Counter", "c1").await.unwrap();
        counter.state().put("count", json!(4)).unwrap();
        let dash = host.create_agent("Dashboard", "d1").await.unwrap();

        let mut monitor = dash.create_monitor(&url("Counter", "c1"), "get", json!({}), Some("onValue"));
        dash.monitors()
            .attach(&mut monitor, MonitorFeature::Poll(Poll::every(Duration::from_millis(30))))
            .await
            .unwrap();
        dash.monitors().store(&monitor).await.unwrap();

        assert!(eventually(|| dash.state().get("lastValue").unwrap() == Some(json!(4))).await);
    }

    // ── Lifecycle ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_delete_agent_cleans_up() {
        let host = host();
        host.create_agent("Counter", "c1").await.unwrap();
        let dash = host.create_agent("Dashboard", "d1").await.unwrap();

        let mut monitor = dash.create_monitor(&url("Counter", "c1"), "get", json!({}), None);
        dash.monitors()
            .add_poll(&mut monitor, Poll::every(Duration::from_secs(60)));
        dash.monitors().store(&monitor).await.unwrap();
        assert_eq!(host.scheduler().len(), 1);

        assert!(host.delete_agent("d1").await.unwrap());
        assert!(host.scheduler().is_empty());
        assert!(!host.states().exists("d1").unwrap());
        let response = host.dispatch("d1", request("getId", json!({})), Origin::Remote).await;
        assert_eq!(error_code(&response), codes::NOT_FOUND);

        assert!(!host.delete_agent("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_typed_delete_checks_stored_type() {
        let host = host();
        host.create_agent("Counter", "c1").await.unwrap();

        assert!(!host.delete_agent_of("Dashboard", "c1").await.unwrap());
        assert!(host.states().exists("c1").unwrap());

        assert!(host.delete_agent_of("Counter", "c1").await.unwrap());
        assert!(!host.states().exists("c1").unwrap());
    }

    #[tokio::test]
    async fn test_agent_reloads_from_state() {
        let mut config = AgoraConfig::default();
        config.host.public_url = Some(BASE.into());
        let states = Arc::new(MemoryStateFactory::new(Some(BASE.into())));

        let first = AgentHost::new(&config, states.clone(), Arc::new(MockTransport::new()));
        first.register::<Counter>();
        first
            .dispatch_to("Counter", "c1", request("increment", json!({"by": 7})), Origin::Remote)
            .await;
        drop(first);

        let second = AgentHost::new(&config, states, Arc::new(MockTransport::new()));
        second.register::<Counter>();
        let response = second.dispatch("c1", request("get", json!({})), Origin::Remote).await;
        assert_eq!(response.result, Some(json!(7)));
    }
}
