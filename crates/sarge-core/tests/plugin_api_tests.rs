//! ---
//! sarge_section: "05-plugins"
//! sarge_subsection: "tests"
//! sarge_type: "test"
//! sarge_scope: "code"
//! sarge_description: "Signal bus and plugin integration tests."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use sarge_common::SargeConfig;
use sarge_config::InstanceRequest;
use sarge_core::{
    AppCfg, Event, InMemorySupervisor, InstanceState, Plugin, Sarge, SargeError, Signal,
    SignalBus, SupervisorCall,
};
use tempfile::tempdir;

fn config_with(plugins: &[&str]) -> SargeConfig {
    SargeConfig {
        plugins: plugins.iter().map(|name| name.to_string()).collect(),
        ..SargeConfig::default()
    }
}

#[test]
fn every_plugin_key_reaches_the_app_config_with_last_writer_winning() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let sarge = Sarge::builder(home.path())
        .with_supervisor(supervisor.clone())
        .subscribe(Signal::Configuring, "first", |event| {
            if let Event::Configuring(ctx) = event {
                ctx.appcfg.insert("ORDER", "first");
                ctx.appcfg.insert("FIRST_ONLY", 1_i64);
            }
            Ok(())
        })
        .subscribe(Signal::Configuring, "second", |event| {
            if let Event::Configuring(ctx) = event {
                ctx.appcfg.insert("ORDER", "second");
            }
            Ok(())
        })
        .subscribe(Signal::WillStart, "late", |event| {
            if let Event::WillStart { appcfg, .. } = event {
                appcfg.insert("your-order", "is here");
            }
            Ok(())
        })
        .build()
        .expect("build");
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    instance.start().expect("start");

    let appcfg = AppCfg::read_from(&instance.paths().appcfg_path).expect("appcfg");
    assert_eq!(appcfg.get("ORDER").and_then(|v| v.as_str()), Some("second"));
    assert_eq!(appcfg.get("FIRST_ONLY").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(appcfg.get("your-order").and_then(|v| v.as_str()), Some("is here"));
}

#[test]
fn configuring_failure_prevents_supervisor_call() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let will_start_ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&will_start_ran);
    let sarge = Sarge::builder(home.path())
        .with_supervisor(supervisor.clone())
        .subscribe(Signal::Configuring, "broken", |_| Err(anyhow!("no ports left")))
        .subscribe(Signal::WillStart, "observer", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .expect("build");
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    let err = instance.start().unwrap_err();
    match &err {
        SargeError::Plugin { signal, handler, .. } => {
            assert_eq!(*signal, Signal::Configuring);
            assert_eq!(handler, "broken");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(instance.state(), InstanceState::Unstarted);
    assert_eq!(will_start_ran.load(Ordering::SeqCst), 0);
    assert!(supervisor.calls().is_empty());
    assert!(!instance.paths().appcfg_path.exists());
}

#[test]
fn context_does_not_leak_between_starts() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let starts = Arc::new(AtomicUsize::new(0));
    let seen_before_write = Arc::new(Mutex::new(Vec::new()));
    let (count, seen) = (Arc::clone(&starts), Arc::clone(&seen_before_write));
    let sarge = Sarge::builder(home.path())
        .with_supervisor(supervisor.clone())
        .subscribe(Signal::Configuring, "once", move |event| {
            if let Event::Configuring(ctx) = event {
                seen.lock().expect("lock").push(ctx.appcfg.len());
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    ctx.appcfg.insert("ONLY_FIRST", "yes");
                }
            }
            Ok(())
        })
        .build()
        .expect("build");
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    instance.start().expect("first start");
    instance.stop().expect("stop");
    instance.start().expect("second start");
    let appcfg = AppCfg::read_from(&instance.paths().appcfg_path).expect("appcfg");
    assert!(!appcfg.contains_key("ONLY_FIRST"));
    assert_eq!(*seen_before_write.lock().expect("lock"), vec![0, 0]);
}

#[test]
fn config_rewrites_apply_to_one_start_only() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let sarge = Sarge::builder(home.path())
        .with_config(config_with(&[]))
        .with_supervisor(supervisor.clone())
        .subscribe(Signal::Configuring, "rewriter", |event| {
            if let Event::Configuring(ctx) = event {
                ctx.config.options.command = Some("./rewritten".into());
            }
            Ok(())
        })
        .build()
        .expect("build");
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    instance.start().expect("start");
    assert!(instance.config().options.command.is_none());
    let stored = sarge.get_instance(instance.id()).expect("lookup");
    assert!(stored.config().options.command.is_none());
    let Some(SupervisorCall::ConfigureAndRestart { spec, .. }) = supervisor.calls().pop() else {
        panic!("expected configure call");
    };
    assert_eq!(spec.processes[0].command, "./rewritten");
}

#[test]
fn has_stopped_follows_supervisor_stop() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let probe = Arc::clone(&supervisor);
    let record = Arc::clone(&observed);
    let sarge = Sarge::builder(home.path())
        .with_supervisor(supervisor.clone())
        .subscribe(Signal::HasStopped, "probe", move |event| {
            if let Event::HasStopped(instance) = event {
                record
                    .lock()
                    .expect("lock")
                    .push((instance.id.to_owned(), probe.is_running(instance.id)));
            }
            Ok(())
        })
        .build()
        .expect("build");
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    instance.start().expect("start");
    instance.stop().expect("stop");
    assert_eq!(
        *observed.lock().expect("lock"),
        vec![(instance.id().to_owned(), false)]
    );
}

#[test]
fn destroy_signal_fires_before_folders_disappear() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let folder_present = Arc::new(Mutex::new(None));
    let record = Arc::clone(&folder_present);
    let sarge = Sarge::builder(home.path())
        .with_supervisor(supervisor.clone())
        .subscribe(Signal::WillBeDestroyed, "probe", move |event| {
            if let Event::WillBeDestroyed(instance) = event {
                *record.lock().expect("lock") = Some(instance.paths.folder.is_dir());
            }
            Ok(())
        })
        .build()
        .expect("build");
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    instance.destroy().expect("destroy");
    assert_eq!(*folder_present.lock().expect("lock"), Some(true));
}

struct CountingPlugin {
    hits: AtomicUsize,
}

impl Plugin for CountingPlugin {
    fn name(&self) -> &str {
        "counting"
    }

    fn subscribe(self: Arc<Self>, bus: &mut SignalBus) {
        bus.subscribe(Signal::WillStart, "counting", move |_| {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
}

#[test]
fn custom_plugins_subscribe_after_configured_ones() {
    let home = tempdir().expect("tempdir");
    let plugin = Arc::new(CountingPlugin {
        hits: AtomicUsize::new(0),
    });
    let sarge = Sarge::builder(home.path())
        .with_config(config_with(&["listen", "nginx"]))
        .with_supervisor(Arc::new(InMemorySupervisor::new()))
        .with_plugin(plugin.clone())
        .build()
        .expect("build");
    assert_eq!(sarge.plugin_names(), ["listen", "nginx", "counting"].map(String::from));
    assert_eq!(
        sarge.bus().subscribers(Signal::WillStart),
        vec!["nginx", "counting"]
    );
    let mut instance = sarge.new_instance(InstanceRequest::default()).expect("new");
    instance.start().expect("start");
    assert_eq!(plugin.hits.load(Ordering::SeqCst), 1);
}

#[test]
fn app_route_generates_server_script_and_nginx_site() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let sarge = Sarge::builder(home.path())
        .with_config(config_with(&["folders", "listen", "nginx"]))
        .with_supervisor(supervisor.clone())
        .build()
        .expect("build");
    sarge.init().expect("init");
    let mut instance = sarge
        .new_instance(
            r#"{"urlmap": [
                {"type": "app", "url": "/", "app_factory": "testyapp:factory"},
                {"type": "static", "url": "/media", "path": "media"}
            ]}"#
            .parse()
            .expect("request"),
        )
        .expect("new");
    instance.start().expect("start");

    let script = fs::read_to_string(&instance.paths().server_script).expect("server script");
    assert!(script.starts_with("#!/bin/sh\nexec 'sarge-app-server' --factory 'testyapp:factory'"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&instance.paths().server_script)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    let Some(SupervisorCall::ConfigureAndRestart { spec, .. }) = supervisor.calls().pop() else {
        panic!("expected configure call");
    };
    assert_eq!(spec.processes[0].command, "./server");

    let appcfg = AppCfg::read_from(&instance.paths().appcfg_path).expect("appcfg");
    let socket = appcfg.get("APP_SOCKET").and_then(|v| v.as_str()).expect("socket");
    let nginx = sarge.layout().nginx_dir();
    let urlmap = fs::read_to_string(nginx.join(format!("{}-urlmap", instance.id()))).expect("urlmap");
    assert!(urlmap.contains(&format!("fastcgi_pass unix:{socket};")));
    assert!(nginx.join(format!("{}-site", instance.id())).is_file());
    assert!(nginx.join("sarge_sites.conf").is_file());

    instance.destroy().expect("destroy");
    assert!(!nginx.join(format!("{}-site", instance.id())).exists());
}

#[test]
fn route_with_unknown_placeholder_aborts_start() {
    let home = tempdir().expect("tempdir");
    let supervisor = Arc::new(InMemorySupervisor::new());
    let sarge = Sarge::builder(home.path())
        .with_config(config_with(&["nginx"]))
        .with_supervisor(supervisor.clone())
        .build()
        .expect("build");
    let mut instance = sarge
        .new_instance(
            r#"{"urlmap": [{"type": "fcgi", "url": "/", "socket": "tcp://localhost:$WEB_PORT"}]}"#
                .parse()
                .expect("request"),
        )
        .expect("new");
    let err = instance.start().unwrap_err();
    assert!(matches!(
        err,
        SargeError::Plugin { signal: Signal::WillStart, .. }
    ));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("WEB_PORT"));
    assert!(supervisor.calls().is_empty());
}
