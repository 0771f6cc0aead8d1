use super::*;

#[test]
fn defaults_run_everything_in_process() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.storage.mode, StorageMode::Memory);
    assert_eq!(settings.broker, BrokerBackend::Memory);
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
    assert_eq!(settings.cache.ttl_seconds.get(), 3600);
    assert_eq!(settings.fanout.backfill_page_size.get(), 100);
    assert!(settings.database.url.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        shared: SharedOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = SharedOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_shared_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn postgres_storage_requires_database_url() {
    let mut raw = RawSettings::default();
    raw.storage.mode = Some("postgres".to_string());

    let err = Settings::from_raw(raw).expect_err("missing url");
    assert!(matches!(err, LoadError::Invalid { key: "database.url", .. }));
}

#[test]
fn cached_mode_over_postgres_requires_database_url() {
    let mut raw = RawSettings::default();
    raw.storage.mode = Some("cached".to_string());

    let err = Settings::from_raw(raw).expect_err("missing url");
    assert!(matches!(err, LoadError::Invalid { key: "database.url", .. }));
}

#[test]
fn cached_mode_over_memory_needs_no_database() {
    let mut raw = RawSettings::default();
    raw.storage.mode = Some("Cached".to_string());
    raw.storage.cached_origin = Some("memory".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.storage.mode, StorageMode::Cached);
    assert!(!settings.storage.uses_postgres());
}

#[test]
fn redis_cache_requires_url() {
    let mut raw = RawSettings::default();
    raw.storage.mode = Some("cached".to_string());
    raw.storage.cached_origin = Some("memory".to_string());
    raw.cache.backend = Some("redis".to_string());

    let err = Settings::from_raw(raw).expect_err("missing redis url");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.redis_url",
            ..
        }
    ));
}

#[test]
fn postgres_broker_requires_database_url() {
    let mut raw = RawSettings::default();
    raw.broker.backend = Some("postgres".to_string());

    let err = Settings::from_raw(raw).expect_err("missing url");
    assert!(matches!(err, LoadError::Invalid { key: "database.url", .. }));
}

#[test]
fn postgres_broker_rejects_process_local_storage() {
    for (mode, origin) in [("memory", "postgres"), ("cached", "memory")] {
        let mut raw = RawSettings::default();
        raw.broker.backend = Some("postgres".to_string());
        raw.database.url = Some("postgres://example".to_string());
        raw.storage.mode = Some(mode.to_string());
        raw.storage.cached_origin = Some(origin.to_string());

        let err = Settings::from_raw(raw).expect_err("process-local storage");
        assert!(
            matches!(err, LoadError::Invalid { key: "broker.backend", .. }),
            "{mode}/{origin}: {err}"
        );
    }
}

#[test]
fn postgres_broker_rejects_process_local_cache() {
    let mut raw = RawSettings::default();
    raw.broker.backend = Some("postgres".to_string());
    raw.database.url = Some("postgres://example".to_string());
    raw.storage.mode = Some("cached".to_string());
    raw.storage.cached_origin = Some("postgres".to_string());
    raw.cache.backend = Some("memory".to_string());

    let err = Settings::from_raw(raw).expect_err("process-local cache");
    assert!(matches!(err, LoadError::Invalid { key: "cache.backend", .. }));

    let mut raw = RawSettings::default();
    raw.broker.backend = Some("postgres".to_string());
    raw.database.url = Some("postgres://example".to_string());
    raw.storage.mode = Some("cached".to_string());
    raw.cache.backend = Some("redis".to_string());
    raw.cache.redis_url = Some("redis://127.0.0.1:6379".to_string());

    let settings = Settings::from_raw(raw).expect("shared cache");
    assert_eq!(settings.broker, BrokerBackend::Postgres);
}

#[test]
fn unknown_storage_mode_is_rejected() {
    let mut raw = RawSettings::default();
    raw.storage.mode = Some("sqlite".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown mode");
    assert!(matches!(err, LoadError::Invalid { key: "storage.mode", .. }));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.fanout.handler_timeout_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.fanout.distribute_concurrency = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn backfill_page_size_is_bounded_by_max_page_size() {
    let mut raw = RawSettings::default();
    raw.fanout.backfill_page_size = Some(101);

    let err = Settings::from_raw(raw).expect_err("too large");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "fanout.backfill_page_size",
            ..
        }
    ));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["murmur"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "murmur",
        "serve",
        "--server-port",
        "9000",
        "--storage-mode",
        "cached",
        "--database-url",
        "postgres://example",
        "--log-json",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(9000));
            assert_eq!(serve.overrides.shared.storage_mode.as_deref(), Some("cached"));
            assert_eq!(
                serve.overrides.shared.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(serve.overrides.shared.log_json, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_worker_arguments() {
    let args = CliArgs::parse_from([
        "murmur",
        "worker",
        "--broker",
        "postgres",
        "--storage-mode",
        "postgres",
        "--database-url",
        "postgres://example",
        "--fanout-backfill-concurrency",
        "8",
    ]);

    match args.command.expect("worker command") {
        Command::Worker(worker) => {
            assert_eq!(worker.overrides.broker.as_deref(), Some("postgres"));
            assert_eq!(worker.overrides.fanout_backfill_concurrency, Some(8));

            let mut raw = RawSettings::default();
            raw.apply_shared_overrides(&worker.overrides);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert_eq!(settings.broker, BrokerBackend::Postgres);
            assert_eq!(settings.fanout.backfill_concurrency.get(), 8);
        }
        _ => panic!("wrong command parsed"),
    }
}
