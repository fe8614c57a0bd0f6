#![cfg(feature = "live")]

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use tokio::time::{Duration, Instant, sleep, timeout};

use kiln::watch::Watcher;
use kiln::{Config, Context, Registry};

fn config(root: &Utf8PathBuf) -> Config {
    let text = r#"{ "paths": { "js": "js", "dist": "dist", "styles": "styles",
                               "client": "client", "img": "img", "node": "node_modules" } }"#;
    Config::from_json(text, root).unwrap()
}

async fn wait_for(counter: &AtomicUsize, at_least: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if counter.load(Ordering::SeqCst) >= at_least {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_reruns_only_matching_binding() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .unwrap()
        .canonicalize_utf8()
        .unwrap();
    fs::create_dir_all(root.join("styles")).unwrap();
    fs::create_dir_all(root.join("js")).unwrap();

    let styles = Arc::new(AtomicUsize::new(0));
    let scripts = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    for (name, counter) in [("styles", styles.clone()), ("scripts", scripts.clone())] {
        registry
            .register(name, move |_: Context| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
    }
    let orchestrator = registry.finish(config(&root)).unwrap();

    let mut watcher = Watcher::new(orchestrator.clone());
    watcher.bind([format!("{root}/styles/**/*.scss")], "styles").unwrap();
    watcher.bind([format!("{root}/js/*.js")], "scripts").unwrap();
    let watching = tokio::spawn(watcher.run());

    // give the watcher time to register its roots
    sleep(Duration::from_millis(300)).await;

    fs::write(root.join("styles/a.scss"), ".a { color: red; }").unwrap();
    assert!(wait_for(&styles, 1).await, "styles never re-ran");

    // settle past the debounce window, then check nothing else fired
    sleep(Duration::from_millis(600)).await;
    assert_eq!(scripts.load(Ordering::SeqCst), 0);

    fs::write(root.join("js/main.js"), "var a;").unwrap();
    assert!(wait_for(&scripts, 1).await, "scripts never re-ran");

    orchestrator.shutdown();
    timeout(Duration::from_secs(5), watching)
        .await
        .expect("watcher did not stop")
        .unwrap()
        .unwrap();
}
