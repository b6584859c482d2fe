use super::*;
use crate::aws_sso::{AwsAccount, TokenResponse};
use crate::eventing::EventEnvelope;
use crate::sinks::aws_credentials_file::{AwsCredentialsFileSink, NewInstanceInput};
use crate::testing::{FakeSsoClient, MemoryClipboard, MockClock, PlainEncryption};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const START_URL: &str = "https://example.awsapps.com/start";
const NOW: i64 = 1_700_000_000;

struct Harness {
    controller: AwsIdcController,
    sso: Arc<FakeSsoClient>,
    clock: Arc<MockClock>,
    bus: Arc<EventBus>,
    sink: Arc<AwsCredentialsFileSink>,
    clipboard: Arc<MemoryClipboard>,
    dir: TempDir,
    ctx: AppContext,
}

fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let clock = Arc::new(MockClock::new(NOW));
    let bus = Arc::new(EventBus::new(db.clone(), clock.clone()));
    let sso = Arc::new(FakeSsoClient::new());
    let clipboard = Arc::new(MemoryClipboard::new());
    let sink = Arc::new(AwsCredentialsFileSink::new(db.clone(), clock.clone()));
    let dir = tempfile::tempdir().unwrap();

    let mut controller = AwsIdcController::new(
        db.clone(),
        bus.clone(),
        Arc::new(FavoritesRepo::new(db)),
        Arc::new(PlainEncryption::new()),
        sso.clone(),
        clipboard.clone(),
        clock.clone(),
    )
    .with_credentials_file(dir.path().join("credentials"));
    controller.add_plumbers([sink.clone() as Arc<dyn Plumber<AwsCredentials>>]);

    Harness {
        controller,
        sso,
        clock,
        bus,
        sink,
        clipboard,
        dir,
        ctx: AppContext::for_request("root", "AwsIdc", CancellationToken::new()),
    }
}

fn setup_input(start_url: &str, region: &str, label: &str) -> SetupInput {
    SetupInput {
        start_url: start_url.to_string(),
        aws_region: region.to_string(),
        label: label.to_string(),
    }
}

fn finalize_input(flow: &AuthorizeDeviceFlowResult) -> FinalizeSetupInput {
    FinalizeSetupInput {
        client_id: flow.client_id.clone(),
        start_url: flow.start_url.clone(),
        aws_region: flow.region.clone(),
        label: flow.label.clone(),
        user_code: flow.user_code.clone(),
        device_code: flow.device_code.clone(),
    }
}

fn token(expires_in: i32) -> TokenResponse {
    TokenResponse {
        id_token: "id-token-2".to_string(),
        access_token: "access-token-2".to_string(),
        refresh_token: "refresh-token-2".to_string(),
        token_type: "Bearer".to_string(),
        expires_in,
    }
}

fn role(instance_id: &str) -> RoleInput {
    RoleInput {
        instance_id: instance_id.to_string(),
        account_id: "111111111111".to_string(),
        role_name: "ReadOnly".to_string(),
    }
}

async fn create_instance(h: &Harness, start_url: &str) -> String {
    let flow = h
        .controller
        .setup(&h.ctx, setup_input(start_url, "eu-west-1", "prod"))
        .await
        .unwrap();
    h.controller
        .finalize_setup(&h.ctx, finalize_input(&flow))
        .await
        .unwrap()
}

fn created_events(h: &Harness) -> Vec<EventEnvelope> {
    h.bus.history(&h.ctx, EVENT_SOURCE).unwrap()
}

#[tokio::test]
async fn test_full_device_flow_setup() {
    let h = harness();
    let mut events = h.bus.subscribe(EVENT_SOURCE);

    let flow = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await
        .unwrap();
    assert_eq!(flow.instance_id, None);
    assert_eq!(flow.user_code, "WXYZ-1234");
    assert_eq!(flow.device_code, "dc-1");
    assert_eq!(flow.expires_in, 600);
    assert_eq!(
        flow.verification_uri,
        "https://device.sso.eu-west-1.amazonaws.com/?user_code=WXYZ-1234"
    );
    assert_eq!(flow.client_id, FakeSsoClient::CLIENT_ID);

    let instance_id = h
        .controller
        .finalize_setup(&h.ctx, finalize_input(&flow))
        .await
        .unwrap();
    assert_eq!(instance_id.len(), 27);

    let log = created_events(&h);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].event_type, "AwsIdcInstanceCreated");
    assert_eq!(log[0].source_id, instance_id);
    let payload: AwsIdcInstanceCreated = log[0].payload().unwrap();
    assert_eq!(
        payload,
        AwsIdcInstanceCreated {
            instance_id: instance_id.clone(),
            start_url: START_URL.to_string(),
            region: "eu-west-1".to_string(),
            label: "prod".to_string(),
        }
    );

    let delivered = events.recv().await.unwrap();
    assert_eq!(delivered, log[0]);

    // The stored secret is used for the token exchange
    let token_args = h.sso.last_token_args();
    assert_eq!(token_args[2], FakeSsoClient::CLIENT_SECRET);
    assert_eq!(token_args[3], "WXYZ-1234");
    assert_eq!(token_args[4], "dc-1");
}

#[tokio::test]
async fn test_duplicate_setup_is_rejected_before_adapter_calls() {
    let h = harness();
    create_instance(&h, START_URL).await;
    let registers = h.sso.register_calls();
    let authorizes = h.sso.authorize_calls();

    let err = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "again"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceAlreadyRegistered);
    assert_eq!(h.sso.register_calls(), registers);
    assert_eq!(h.sso.authorize_calls(), authorizes);
}

#[tokio::test]
async fn test_setup_validation() {
    let h = harness();
    let cases = [
        (setup_input("not a url", "eu-west-1", "prod"), ErrorCode::InvalidStartUrl),
        (setup_input("/start", "eu-west-1", "prod"), ErrorCode::InvalidStartUrl),
        (setup_input(START_URL, "mars-north-1", "prod"), ErrorCode::InvalidAwsRegion),
        (setup_input(START_URL, "eu-west-1", ""), ErrorCode::InvalidLabel),
        (setup_input(START_URL, "eu-west-1", &"x".repeat(51)), ErrorCode::InvalidLabel),
    ];

    for (input, code) in cases {
        let err = h.controller.setup(&h.ctx, input).await.unwrap_err();
        assert_eq!(err, code);
    }
    assert_eq!(h.sso.register_calls(), 0);
    assert_eq!(h.sso.authorize_calls(), 0);
}

#[tokio::test]
async fn test_setup_adapter_failures() {
    let h = harness();

    h.sso
        .push_registration(Err(SsoError::Other(anyhow::anyhow!("network down"))));
    let err = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::TransientAwsClientError);

    h.sso.push_authorization(Err(SsoError::InvalidRequest));
    let err = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InvalidStartUrl);

    h.sso
        .push_authorization(Err(SsoError::Other(anyhow::anyhow!("throttled"))));
    let err = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::TransientAwsClientError);
}

#[tokio::test]
async fn test_finalize_error_mapping_persists_nothing() {
    let h = harness();
    let flow = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await
        .unwrap();

    let outcomes = [
        (SsoError::DeviceFlowNotAuthorized, ErrorCode::DeviceAuthFlowNotAuthorized),
        (SsoError::DeviceCodeExpired, ErrorCode::DeviceAuthFlowTimedOut),
        (SsoError::Other(anyhow::anyhow!("boom")), ErrorCode::TransientAwsClientError),
    ];
    for (sso_err, code) in outcomes {
        h.sso.push_token(Err(sso_err));
        let err = h
            .controller
            .finalize_setup(&h.ctx, finalize_input(&flow))
            .await
            .unwrap_err();
        assert_eq!(err, code);
    }

    assert!(h.controller.list_instances(&h.ctx).unwrap().is_empty());
    assert!(created_events(&h).is_empty());
}

#[tokio::test]
async fn test_finalize_without_registration() {
    let h = harness();
    let err = h
        .controller
        .finalize_setup(
            &h.ctx,
            FinalizeSetupInput {
                client_id: "client-1".to_string(),
                start_url: START_URL.to_string(),
                aws_region: "us-east-1".to_string(),
                label: "prod".to_string(),
                user_code: "WXYZ-1234".to_string(),
                device_code: "dc-1".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::DeviceAuthFlowNotAuthorized);
    assert_eq!(h.sso.token_calls(), 0);
}

#[tokio::test]
async fn test_closed_bus_rolls_back_instance() {
    let h = harness();
    let flow = h
        .controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await
        .unwrap();
    h.bus.close();

    let err = h
        .controller
        .finalize_setup(&h.ctx, finalize_input(&flow))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::BusClosed);
    assert!(h.controller.list_instances(&h.ctx).unwrap().is_empty());
    assert!(created_events(&h).is_empty());
}

#[tokio::test]
async fn test_client_registration_is_per_region_and_renewed_on_expiry() {
    let h = harness();
    h.sso.push_registration(Ok(RegistrationResponse {
        client_id: "short-lived".to_string(),
        client_secret: "s".to_string(),
        created_at: NOW,
        expires_at: NOW + 60,
    }));

    h.controller
        .setup(&h.ctx, setup_input(START_URL, "eu-west-1", "a"))
        .await
        .unwrap();
    let args = h.sso.last_register_args();
    assert_eq!(args[0], "eu-west-1");
    assert!(args[1].starts_with("credflow_"));
    assert_eq!(args[1].len(), "credflow_".len() + 6);

    h.controller
        .setup(&h.ctx, setup_input("https://b.awsapps.com/start", "eu-west-1", "b"))
        .await
        .unwrap();
    assert_eq!(h.sso.register_calls(), 1);

    h.controller
        .setup(&h.ctx, setup_input("https://c.awsapps.com/start", "us-east-1", "c"))
        .await
        .unwrap();
    assert_eq!(h.sso.register_calls(), 2);

    h.clock.advance(61);
    let flow = h
        .controller
        .setup(&h.ctx, setup_input("https://d.awsapps.com/start", "eu-west-1", "d"))
        .await
        .unwrap();
    assert_eq!(h.sso.register_calls(), 3);
    assert_eq!(flow.client_id, FakeSsoClient::CLIENT_ID);
}

#[tokio::test]
async fn test_instance_data_lists_accounts_and_caches() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;

    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert!(!card.is_access_token_expired);
    assert!(card.enabled);
    assert_eq!(card.label, "prod");
    assert_eq!(card.access_token_expires_in, "in 8 hours");
    assert_eq!(card.accounts.len(), 1);
    assert_eq!(card.accounts[0].account_id, "111111111111");
    assert_eq!(
        card.accounts[0].roles,
        vec![
            AccountRole {
                role_name: "AdministratorAccess".to_string()
            },
            AccountRole {
                role_name: "ReadOnly".to_string()
            },
        ]
    );
    assert_eq!(
        h.sso.last_list_accounts_args(),
        vec!["eu-west-1".to_string(), FakeSsoClient::ACCESS_TOKEN.to_string()]
    );

    let cached = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert_eq!(cached, card);
    assert_eq!(h.sso.list_accounts_calls(), 1);

    h.sso.push_accounts(Ok(vec![AwsAccount {
        account_id: "222222222222".to_string(),
        account_name: "staging".to_string(),
        account_email: "staging@example.com".to_string(),
        roles: vec![],
    }]));
    let refreshed = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, true)
        .await
        .unwrap();
    assert_eq!(h.sso.list_accounts_calls(), 2);
    assert_eq!(refreshed.accounts[0].account_name, "staging");
}

#[tokio::test]
async fn test_unknown_instance() {
    let h = harness();
    let err = h
        .controller
        .get_instance_data(&h.ctx, "missing", false)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);

    let err = h
        .controller
        .get_role_credentials(&h.ctx, &role("missing"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);
}

#[tokio::test]
async fn test_token_expiry_discovered_on_read() {
    let h = harness();
    h.clock.set(1);
    h.sso.push_token(Ok(token(300)));
    let instance_id = create_instance(&h, START_URL).await;

    h.clock.set(400);
    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert!(card.is_access_token_expired);
    assert!(card.accounts.is_empty());
    assert_eq!(card.access_token_expires_in, "2 minutes ago");
    assert_eq!(h.sso.list_accounts_calls(), 0);
}

#[tokio::test]
async fn test_adapter_reported_expiry_invalidates_cache() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;

    // Warm the cache, then have the portal reject the token on a forced read
    h.controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    h.sso.push_accounts(Err(SsoError::AccessTokenExpired));
    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, true)
        .await
        .unwrap();
    assert!(card.is_access_token_expired);
    assert_eq!(card.access_token_expires_in, "stale");
    assert!(card.accounts.is_empty());
    assert_eq!(h.sso.list_accounts_calls(), 2);

    let again = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert!(again.is_access_token_expired);
    assert!(again.accounts.is_empty());
    assert_eq!(h.sso.list_accounts_calls(), 2);
}

#[tokio::test]
async fn test_list_accounts_failure_is_transient() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;
    h.sso
        .push_accounts(Err(SsoError::Other(anyhow::anyhow!("503"))));

    let err = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::TransientAwsClientError);
}

#[tokio::test]
async fn test_role_credentials() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;

    let creds = h
        .controller
        .get_role_credentials(&h.ctx, &role(&instance_id))
        .await
        .unwrap();
    assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
    assert_eq!(creds.session_token, "session-token");

    h.sso
        .push_role_credentials(Err(SsoError::Other(anyhow::anyhow!("throttled"))));
    let err = h
        .controller
        .get_role_credentials(&h.ctx, &role(&instance_id))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::TransientAwsClientError);
}

#[tokio::test]
async fn test_stale_token_on_role_credentials() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;
    h.sso.push_role_credentials(Err(SsoError::AccessTokenExpired));

    let err = h
        .controller
        .get_role_credentials(&h.ctx, &role(&instance_id))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::StaleAwsAccessToken);

    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert!(card.is_access_token_expired);
    assert_eq!(h.sso.list_accounts_calls(), 0);
}

#[test]
fn test_format_exports() {
    let creds = RoleCredentials {
        access_key_id: "AK".to_string(),
        secret_access_key: "SK".to_string(),
        session_token: "ST".to_string(),
        expiration: 0,
    };
    assert_eq!(
        format_exports(&creds, false),
        "export AWS_ACCESS_KEY_ID=\"AK\"\nexport AWS_SECRET_ACCESS_KEY=\"SK\"\nexport AWS_SESSION_TOKEN=\"ST\""
    );
    assert_eq!(
        format_exports(&creds, true),
        "$Env:AWS_ACCESS_KEY_ID=\"AK\"\n$Env:AWS_SECRET_ACCESS_KEY=\"SK\"\n$Env:AWS_SESSION_TOKEN=\"ST\""
    );
}

#[tokio::test]
async fn test_copy_role_credentials() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;

    h.controller
        .copy_role_credentials(&h.ctx, &role(&instance_id))
        .await
        .unwrap();
    let text = h.clipboard.contents().unwrap();
    assert!(text.contains("AWS_ACCESS_KEY_ID=\"ASIAEXAMPLE\""));
    assert!(text.contains("AWS_SESSION_TOKEN=\"session-token\""));
}

#[tokio::test]
async fn test_save_role_credentials() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;

    h.controller
        .save_role_credentials(
            &h.ctx,
            SaveRoleCredentialsInput {
                instance_id: instance_id.clone(),
                account_id: "111111111111".to_string(),
                role_name: "ReadOnly".to_string(),
                aws_profile: " work ".to_string(),
            },
        )
        .await
        .unwrap();

    let written = std::fs::read_to_string(h.dir.path().join("credentials")).unwrap();
    assert!(written.starts_with("[work]\n"));
    assert!(written.contains("aws_access_key_id = ASIAEXAMPLE\n"));
    assert!(written.contains("aws_session_token = session-token\n"));

    let err = h
        .controller
        .save_role_credentials(
            &h.ctx,
            SaveRoleCredentialsInput {
                instance_id,
                account_id: "111111111111".to_string(),
                role_name: "ReadOnly".to_string(),
                aws_profile: "   ".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InvalidAwsProfileName);
    assert_eq!(h.sso.role_credentials_calls(), 1);
}

#[tokio::test]
async fn test_refresh_access_token() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;
    h.sso.push_role_credentials(Err(SsoError::AccessTokenExpired));
    h.controller
        .get_role_credentials(&h.ctx, &role(&instance_id))
        .await
        .unwrap_err();

    let flow = h
        .controller
        .refresh_access_token(&h.ctx, &instance_id)
        .await
        .unwrap();
    assert_eq!(flow.instance_id.as_deref(), Some(instance_id.as_str()));
    assert_eq!(flow.start_url, START_URL);
    assert_eq!(flow.region, "eu-west-1");
    assert_eq!(flow.label, "prod");

    h.sso.push_token(Ok(token(3_600)));
    h.controller
        .finalize_refresh_access_token(
            &h.ctx,
            FinalizeRefreshInput {
                instance_id: instance_id.clone(),
                region: flow.region.clone(),
                user_code: flow.user_code.clone(),
                device_code: flow.device_code.clone(),
            },
        )
        .await
        .unwrap();

    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert!(!card.is_access_token_expired);
    assert_eq!(card.access_token_expires_in, "in an hour");
    assert_eq!(
        h.sso.last_list_accounts_args()[1],
        "access-token-2".to_string()
    );
}

#[tokio::test]
async fn test_refresh_unknown_instance() {
    let h = harness();
    let err = h
        .controller
        .refresh_access_token(&h.ctx, "missing")
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);

    create_instance(&h, START_URL).await;
    let token_calls = h.sso.token_calls();
    let err = h
        .controller
        .finalize_refresh_access_token(
            &h.ctx,
            FinalizeRefreshInput {
                instance_id: "missing".to_string(),
                region: "eu-west-1".to_string(),
                user_code: "WXYZ-1234".to_string(),
                device_code: "dc-1".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);
    assert_eq!(h.sso.token_calls(), token_calls);

    let err = h
        .controller
        .finalize_refresh_access_token(
            &h.ctx,
            FinalizeRefreshInput {
                instance_id: "missing".to_string(),
                region: "moon-1".to_string(),
                user_code: "WXYZ-1234".to_string(),
                device_code: "dc-1".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InvalidAwsRegion);
}

#[tokio::test]
async fn test_finalize_refresh_rejects_other_region() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;
    // Registration for the other region exists too
    h.controller
        .setup(&h.ctx, setup_input("https://us.awsapps.com/start", "us-east-1", "us"))
        .await
        .unwrap();
    let token_calls = h.sso.token_calls();

    let err = h
        .controller
        .finalize_refresh_access_token(
            &h.ctx,
            FinalizeRefreshInput {
                instance_id: instance_id.clone(),
                region: "us-east-1".to_string(),
                user_code: "WXYZ-1234".to_string(),
                device_code: "dc-1".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InvalidAwsRegion);
    assert_eq!(h.sso.token_calls(), token_calls);

    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert_eq!(card.access_token_expires_in, "in 8 hours");
}

#[tokio::test]
async fn test_favorites() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;

    h.controller.mark_as_favorite(&h.ctx, &instance_id).unwrap();
    h.controller.mark_as_favorite(&h.ctx, &instance_id).unwrap();
    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert!(card.is_favorite);

    h.controller
        .unmark_as_favorite(&h.ctx, &instance_id)
        .unwrap();
    let err = h
        .controller
        .unmark_as_favorite(&h.ctx, &instance_id)
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);

    let err = h.controller.mark_as_favorite(&h.ctx, "missing").unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);
}

#[tokio::test]
async fn test_list_instances_newest_first() {
    let h = harness();
    let older = create_instance(&h, START_URL).await;
    h.clock.advance(100);
    let newer = create_instance(&h, "https://other.awsapps.com/start").await;

    assert_eq!(
        h.controller.list_instances(&h.ctx).unwrap(),
        vec![newer, older]
    );
}

#[tokio::test]
async fn test_flow_credentials_into_connected_sink() {
    let h = harness();
    let instance_id = create_instance(&h, START_URL).await;
    let path = h.dir.path().join("sink").join("credentials");

    let sink_id = h
        .sink
        .new_instance(
            &h.ctx,
            NewInstanceInput {
                file_path: path.to_string_lossy().into_owned(),
                aws_profile_name: "ci".to_string(),
                label: "CI".to_string(),
                provider_code: PROVIDER_CODE.to_string(),
                provider_id: instance_id.clone(),
            },
        )
        .unwrap();

    let card = h
        .controller
        .get_instance_data(&h.ctx, &instance_id, false)
        .await
        .unwrap();
    assert_eq!(
        card.sinks,
        vec![SinkInstance {
            sink_code: "aws-credentials-file".to_string(),
            sink_id: sink_id.clone(),
        }]
    );

    let flow = |sink_code: &str, sink_id: &str| FlowCredentialsInput {
        sink_code: sink_code.to_string(),
        sink_id: sink_id.to_string(),
        instance_id: instance_id.clone(),
        account_id: "111111111111".to_string(),
        role_name: "ReadOnly".to_string(),
    };

    h.controller
        .flow_credentials(&h.ctx, flow("aws-credentials-file", &sink_id))
        .await
        .unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("[ci]\n"));

    let err = h
        .controller
        .flow_credentials(&h.ctx, flow("aws-credentials-file", "other"))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);

    let err = h
        .controller
        .flow_credentials(&h.ctx, flow("gcp-file", &sink_id))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InstanceWasNotFound);
}

#[tokio::test]
async fn test_cancelled_context() {
    let h = harness();
    let token = CancellationToken::new();
    let ctx = AppContext::for_request("root", "AwsIdc", token.clone());
    token.cancel();

    let res = h
        .controller
        .setup(&ctx, setup_input(START_URL, "eu-west-1", "prod"))
        .await;
    assert!(matches!(res, Err(AppError::Cancelled)));
    assert_eq!(h.sso.register_calls(), 0);
}
