#![cfg(unix)]

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use kiln::{Config, TaskState, theme};

const VENDOR: [(&str, &str); 3] = [
    ("babel-polyfill/dist/polyfill.js", "/* polyfill */"),
    ("bootstrap/dist/js/bootstrap.min.js", "/* bootstrap */"),
    ("magnific-popup/dist/jquery.magnific-popup.js", "/* magnific */"),
];

fn theme_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    let mut files = vec![
        ("js/main.js".to_string(), "/* main */"),
        ("styles/a.scss".to_string(), ".a { color: red; }\n"),
        ("client/client.scss".to_string(), ".client { margin: 0; }\n"),
        ("client/client-editor.scss".to_string(), ".editor { margin: 0; }\n"),
    ];
    files.extend(VENDOR.iter().map(|(path, text)| (format!("node_modules/{path}"), *text)));

    for (path, text) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    (dir, root)
}

/// Bundling and minifying are plain copies, so the output shows exactly
/// what went in and in which order.
fn config(root: &Utf8Path, bundler: &str) -> Config {
    let text = format!(
        r#"{{
            "paths": {{
                "js": "js", "dist": "dist", "styles": "styles",
                "client": "client", "img": "img", "node": "node_modules"
            }},
            "bundler": {bundler},
            "minifier": {{ "program": "cat" }}
        }}"#
    );
    Config::from_json(&text, root).unwrap()
}

const CAT_FILE: &str = r#"{ "program": "cat", "args": ["{file}"] }"#;

fn positions(text: &str, needles: &[&str]) -> Vec<usize> {
    needles
        .iter()
        .map(|needle| text.find(needle).unwrap_or_else(|| panic!("{needle} missing")))
        .collect()
}

#[tokio::test]
async fn scripts_concatenate_in_declared_order() {
    let (_guard, root) = theme_dir();
    let js = root.join("dist/js");
    fs::create_dir_all(&js).unwrap();
    fs::write(js.join("main.bundle.js"), "/* bundle */").unwrap();

    let orchestrator = theme::orchestrator(config(&root, CAT_FILE)).unwrap();
    let report = orchestrator.run("scripts").await;
    assert!(report.is_success(), "{:?}", report.error);

    let mut outputs: Vec<_> = fs::read_dir(&js)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    outputs.sort();
    assert_eq!(outputs, ["main.bundle.js", "theme.min.js"]);

    let text = fs::read_to_string(js.join("theme.min.js")).unwrap();
    let found = positions(&text, &["polyfill", "bootstrap", "magnific", "bundle"]);
    assert!(found.windows(2).all(|pair| pair[0] < pair[1]), "{text}");
}

#[tokio::test]
async fn bundle_writes_the_bundled_entry() {
    let (_guard, root) = theme_dir();

    let orchestrator = theme::orchestrator(config(&root, CAT_FILE)).unwrap();
    assert!(orchestrator.run("bundle").await.is_success());

    let bundle = fs::read_to_string(root.join("dist/js/main.bundle.js")).unwrap();
    assert_eq!(bundle, "/* main */");
    assert!(!root.join("dist/js/main.js").exists());
}

#[tokio::test]
async fn build_runs_bundle_styles_and_scripts() {
    let (_guard, root) = theme_dir();

    let orchestrator = theme::orchestrator(config(&root, CAT_FILE)).unwrap();
    let report = orchestrator.run("build").await;
    assert!(report.is_success(), "{:?}", report.root_causes());

    assert!(root.join("dist/css/a.min.css").exists());
    assert!(root.join("client/dist/client-editor.min.css").exists());

    let text = fs::read_to_string(root.join("dist/js/theme.min.js")).unwrap();
    let found = positions(&text, &["polyfill", "magnific", "main"]);
    assert!(found.windows(2).all(|pair| pair[0] < pair[1]), "{text}");
}

#[tokio::test]
async fn failed_bundle_stops_build() {
    let (_guard, root) = theme_dir();

    let bundler = r#"{ "program": "false" }"#;
    let orchestrator = theme::orchestrator(config(&root, bundler)).unwrap();
    let report = orchestrator.run("build").await;

    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.find("bundle").unwrap().state, TaskState::Failed);
    assert_eq!(report.find("styles").unwrap().state, TaskState::Pending);
    assert_eq!(report.find("scripts").unwrap().state, TaskState::Pending);
    assert!(!root.join("dist/js/theme.min.js").exists());
    assert!(!root.join("dist/css").exists());
}

#[tokio::test]
async fn dropdist_empties_dist() {
    let (_guard, root) = theme_dir();
    fs::create_dir_all(root.join("dist/css")).unwrap();
    fs::write(root.join("dist/css/old.css"), "old").unwrap();
    fs::write(root.join("dist/stale.js"), "old").unwrap();

    let orchestrator = theme::orchestrator(config(&root, CAT_FILE)).unwrap();
    assert!(orchestrator.run("dropdist").await.is_success());

    assert!(root.join("dist").is_dir());
    assert_eq!(fs::read_dir(root.join("dist")).unwrap().count(), 0);
}
