use super::*;
use std::io::Write;

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("v2ray-config-{}-{name}", std::process::id()));
    let mut file = File::create(&path).expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    path
}

#[test]
fn template_builds_socks_and_freedom() {
    let config = from_str(TEMPLATE).expect("template must build");
    assert_eq!(config.log_level, Some(LogLevel::Info));
    assert_eq!(config.inbounds.len(), 1);
    let inbound = &config.inbounds[0];
    assert_eq!(inbound.listen.port(), 1080);
    assert_eq!(inbound.listen.ip(), DEFAULT_LISTEN);
    assert_eq!(
        inbound.kind,
        InboundKind::Socks {
            accounts: Vec::new(),
            udp: true
        }
    );
    assert_eq!(config.outbounds[0].kind, OutboundKind::Freedom);
}

#[test]
fn malformed_json_is_a_syntax_error() {
    let error = from_str("{not json").unwrap_err();
    assert!(matches!(error, ConfigError::Syntax(_)), "{error:?}");
    assert!(!error.to_string().is_empty());
}

#[test]
fn unknown_protocols_fail_to_build() {
    let error = from_str(r#"{"inbounds":[{"port":1,"protocol":"vmess"}]}"#).unwrap_err();
    assert!(matches!(
        error,
        ConfigError::Build(BuildError::UnknownInbound(ref name)) if name == "vmess"
    ));

    let error = from_str(r#"{"outbounds":[{"protocol":"trojan"}]}"#).unwrap_err();
    assert_eq!(error.to_string(), "unknown outbound protocol: trojan");
}

#[test]
fn unknown_keys_are_ignored() {
    let config = from_str(r#"{"routing":{"rules":[]},"outbounds":[{"protocol":"freedom"}]}"#)
        .expect("extra keys are tolerated");
    assert!(config.inbounds.is_empty());
    assert_eq!(config.outbounds.len(), 1);
}

#[test]
fn listen_and_tags_are_carried() {
    let config = from_str(
        r#"{
            "inbounds": [{"port": 0, "listen": "127.0.0.1", "protocol": "http", "tag": "web"}],
            "outbounds": [{"protocol": "blackhole", "tag": ""}]
        }"#,
    )
    .expect("valid config");
    assert_eq!(config.inbounds[0].listen, "127.0.0.1:0".parse().unwrap());
    assert_eq!(config.inbounds[0].tag.as_deref(), Some("web"));
    assert_eq!(config.outbounds[0].tag, None);
    assert_eq!(config.log_level, None);

    let error = from_str(r#"{"inbounds":[{"port":1,"listen":"localhost","protocol":"http"}]}"#)
        .unwrap_err();
    assert!(matches!(
        error,
        ConfigError::Build(BuildError::InvalidListen(_))
    ));
}

#[test]
fn socks_password_auth_requires_accounts() {
    let error = from_str(
        r#"{"inbounds":[{"port":1,"protocol":"socks","settings":{"auth":"password"}}]}"#,
    )
    .unwrap_err();
    assert!(error.to_string().contains("password auth requires accounts"));

    let config = from_str(
        r#"{"inbounds":[{"port":1,"protocol":"socks","settings":{
            "auth":"password","accounts":[{"user":"u","pass":"p"}]}}]}"#,
    )
    .expect("password auth with accounts");
    match &config.inbounds[0].kind {
        InboundKind::Socks { accounts, udp } => {
            assert_eq!(accounts.len(), 1);
            assert!(!udp);
            assert!(!format!("{:?}", accounts[0]).contains("\"p\""));
        }
        other => panic!("unexpected inbound {other:?}"),
    }
}

#[test]
fn dokodemo_requires_destination() {
    let error =
        from_str(r#"{"inbounds":[{"port":1,"protocol":"dokodemo-door"}]}"#).unwrap_err();
    assert!(error.to_string().contains("settings are required"));

    let config = from_str(
        r#"{"inbounds":[{"port":1,"protocol":"dokodemo-door",
            "settings":{"address":"1.1.1.1","port":53}}]}"#,
    )
    .expect("complete dokodemo settings");
    assert_eq!(
        config.inbounds[0].kind,
        InboundKind::DokodemoDoor {
            address: "1.1.1.1".to_string(),
            port: 53
        }
    );
}

#[test]
fn unknown_log_level_is_rejected() {
    let error = from_str(r#"{"log":{"loglevel":"chatty"}}"#).unwrap_err();
    assert_eq!(error.to_string(), "unknown log level: chatty");
}

#[test]
fn load_reports_missing_file() {
    let path = std::env::temp_dir().join("v2ray-config-definitely-missing.json");
    let error = load(&path).unwrap_err();
    assert!(matches!(error, ConfigError::Open { .. }));
    assert!(error.to_string().starts_with("open "));
}

#[test]
fn load_reads_file() {
    let path = temp_file("load.json", TEMPLATE);
    let config = load(&path).expect("template file loads");
    assert_eq!(config.inbounds.len(), 1);

    let broken = temp_file("broken.json", "{\"inbounds\": [");
    assert!(matches!(load(&broken), Err(ConfigError::Syntax(_))));

    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(broken);
}
