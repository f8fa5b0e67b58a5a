#[cfg(test)]
mod tests {
    use agora_core::*;
    use serde_json::json;

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = AgoraError::MethodNotFound("doSomething".into());
        assert!(err.to_string().contains("doSomething"));
    }

    #[test]
    fn test_error_contention_mentions_attempts() {
        let err = AgoraError::Contention {
            key: "_monitors".into(),
            attempts: 32,
        };
        let s = err.to_string();
        assert!(s.contains("_monitors"));
        assert!(s.contains("32"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AgoraError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_dispatch_errors_map_to_rpc_codes() {
        assert_eq!(
            AgoraError::MethodNotFound("x".into()).to_rpc_error().code,
            codes::METHOD_NOT_FOUND
        );
        assert_eq!(
            AgoraError::AccessDenied("x".into()).to_rpc_error().code,
            codes::ACCESS_DENIED
        );
        assert_eq!(
            AgoraError::invalid_params("m", "missing 'a'").to_rpc_error().code,
            codes::INVALID_PARAMS
        );
    }

    #[test]
    fn test_application_error_keeps_code_and_data() {
        let err = AgoraError::Application {
            code: 42,
            message: "out of stock".into(),
            data: Some(json!({"sku": "A1"})),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, 42);
        assert_eq!(rpc.message, "out of stock");
        assert_eq!(rpc.data, Some(json!({"sku": "A1"})));
    }

    #[test]
    fn test_from_rpc_error_roundtrips_dispatch_variants() {
        let err = AgoraError::from_rpc_error(RpcError {
            code: codes::METHOD_NOT_FOUND,
            message: "method not found: nope".into(),
            data: None,
        });
        assert!(matches!(err, AgoraError::MethodNotFound(_)));

        let err = AgoraError::from_rpc_error(RpcError {
            code: 7,
            message: "boom".into(),
            data: None,
        });
        assert!(matches!(err, AgoraError::Application { code: 7, .. }));
    }

    #[test]
    fn test_contention_survives_the_wire() {
        let rpc = AgoraError::Contention {
            key: "_monitors".into(),
            attempts: 32,
        }
        .to_rpc_error();
        assert_eq!(rpc.code, codes::CONTENTION);
        match AgoraError::from_rpc_error(rpc) {
            AgoraError::Contention { key, attempts } => {
                assert_eq!(key, "_monitors");
                assert_eq!(attempts, 32);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_transport_error_survives_the_wire() {
        let rpc = AgoraError::Transport {
            url: "http://remote:9000/agents/Sensor/x/".into(),
            reason: "connection refused".into(),
        }
        .to_rpc_error();
        assert_eq!(rpc.code, codes::TRANSPORT_ERROR);
        match AgoraError::from_rpc_error(rpc) {
            AgoraError::Transport { url, reason } => {
                assert_eq!(url, "http://remote:9000/agents/Sensor/x/");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_serialization_failure_is_internal() {
        let err: AgoraError = serde_json::from_str::<serde_json::Value>("{broken")
            .unwrap_err()
            .into();
        assert_eq!(err.to_rpc_error().code, codes::INTERNAL_ERROR);
    }

    // ── Request / response tests ───────────────────────────────

    #[test]
    fn test_request_from_null_params_is_empty_object() {
        let req = RpcRequest::from_value("getId", serde_json::Value::Null).unwrap();
        assert!(req.params.is_empty());
        assert!(req.callback.is_none());
    }

    #[test]
    fn test_request_rejects_array_params() {
        let err = RpcRequest::from_value("add", json!([1, 2])).unwrap_err();
        assert!(matches!(err, AgoraError::InvalidParams { .. }));
    }

    #[test]
    fn test_request_shape_omits_empty_fields() {
        let req = RpcRequest::from_value("ping", json!({"n": 1})).unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({"method": "ping", "params": {"n": 1}}));
    }

    #[test]
    fn test_request_with_callback_serializes_route() {
        let req = RpcRequest::from_value("getValue", json!({}))
            .unwrap()
            .with_callback("http://a/agents/t/1/", "onValue");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["callback"]["url"], "http://a/agents/t/1/");
        assert_eq!(json["callback"]["method"], "onValue");
    }

    #[test]
    fn test_response_into_result() {
        assert_eq!(RpcResponse::ok(json!(5)).into_result().unwrap(), json!(5));

        let resp = RpcResponse::from_result(Err(AgoraError::AccessDenied("trigger".into())));
        assert!(resp.is_error());
        assert!(matches!(
            resp.into_result().unwrap_err(),
            AgoraError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_null_result_survives_serialization() {
        let resp = RpcResponse::ok(serde_json::Value::Null);
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"result":null}"#);
        let restored: RpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.into_result().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_callback_params() {
        let ok = RpcResponse::ok(json!("v")).to_callback_params();
        assert_eq!(ok.get("result"), Some(&json!("v")));

        let err = RpcResponse::err(RpcError {
            code: -1,
            message: "nope".into(),
            data: None,
        })
        .to_callback_params();
        assert_eq!(err["error"]["message"], "nope");
        assert!(!err.contains_key("result"));
    }

    // ── Addressing tests ───────────────────────────────────────

    #[test]
    fn test_agent_url_build_and_parse() {
        let url = AgentUrl::build("http://localhost:3800/", "Counter", "c1");
        assert_eq!(url, "http://localhost:3800/agents/Counter/c1/");

        let parsed = AgentUrl::parse(&url).unwrap();
        assert_eq!(parsed.agent_type, "Counter");
        assert_eq!(parsed.agent_id, "c1");
    }

    #[test]
    fn test_agent_url_parse_under_prefix_without_slash() {
        let parsed = AgentUrl::parse("https://example.com/eve/agents/Calendar/alice").unwrap();
        assert_eq!(parsed.agent_type, "Calendar");
        assert_eq!(parsed.agent_id, "alice");
    }

    #[test]
    fn test_agent_url_parse_rejects_other_paths() {
        assert!(AgentUrl::parse("http://localhost/health").is_none());
        assert!(AgentUrl::parse("not a url").is_none());
        assert!(AgentUrl::parse("http://localhost/things/Counter/c1/").is_none());
    }

    #[test]
    fn test_agent_url_is_local() {
        let base = "http://localhost:3800";
        assert!(AgentUrl::is_local(base, "http://localhost:3800/agents/A/1/"));
        assert!(!AgentUrl::is_local(base, "http://localhost:3801/agents/A/1/"));
        assert!(!AgentUrl::is_local(base, "http://remote:3800/agents/A/1/"));
    }

    // ── Event / callback tests ─────────────────────────────────

    #[test]
    fn test_callback_serde_field_names() {
        let cb = Callback::new("http://b/agents/B/1/", "onTick");
        let json = serde_json::to_value(&cb).unwrap();
        assert_eq!(
            json,
            json!({"callbackUrl": "http://b/agents/B/1/", "callbackMethod": "onTick"})
        );
    }

    #[test]
    fn test_subscription_key() {
        assert_eq!(subscription_key("tick"), "subscriptions.tick");
        assert_eq!(subscription_key(WILDCARD_EVENT), "subscriptions.*");
    }

    #[test]
    fn test_event_notification_shape() {
        let n = EventNotification::new("http://a/agents/A/1/", "tick", json!({"n": 1}));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(
            json,
            json!({"agent": "http://a/agents/A/1/", "event": "tick", "params": {"n": 1}})
        );
    }
}
