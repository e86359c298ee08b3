//! HTTP API tests against a server running in-process on a free port.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use fraud_assist::assistant::Assistant;
use fraud_assist::config::Config;
use fraud_assist::server::run_server;

fn test_config(docs: &std::path::Path, port: u16) -> Config {
    let config_content = format!(
        r#"[docs]
dir = "{}"

[server]
bind = "127.0.0.1:{}"
"#,
        docs.display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn bundled_docs() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data").join("docs")
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server over `docs` without building the index.
async fn start(docs: &std::path::Path) -> (u16, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let assistant = Arc::new(Assistant::new(test_config(docs, port)).unwrap());
    let handle = tokio::spawn(async move {
        run_server(assistant).await.ok();
    });
    wait_for_server(port).await;
    (port, handle)
}

async fn ingest(client: &reqwest::Client, port: u16) -> Value {
    let resp = client
        .post(format!("http://127.0.0.1:{}/ingest", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_before_and_after_ingest() {
    let (port, handle) = start(&bundled_docs()).await;
    let client = reqwest::Client::new();
    let health_url = format!("http://127.0.0.1:{}/health", port);

    let body: Value = client.get(&health_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "starting");
    assert_eq!(body["index_ready"], false);
    assert_eq!(body["chunk_count"], 0);

    let report = ingest(&client, port).await;
    assert_eq!(report["success"], true);
    assert_eq!(report["documents_indexed"], 3);
    assert_eq!(report["rebuilt"], true);

    let body: Value = client.get(&health_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["index_ready"], true);
    assert_eq!(body["generator"], "extractive");
    assert!(body["last_indexed_at"].is_string());

    handle.abort();
}

#[tokio::test]
async fn test_chat_before_ingest_is_unavailable() {
    let (port, handle) = start(&bundled_docs()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({"user_message": "Oui, c'est une fraude"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "index_unready");

    let resp = client
        .get(format!("http://127.0.0.1:{}/documents", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    handle.abort();
}

#[tokio::test]
async fn test_chat_card_fraud() {
    let (port, handle) = start(&bundled_docs()).await;
    let client = reqwest::Client::new();
    ingest(&client, port).await;

    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({
            "user_message": "Oui, c'est une fraude",
            "transaction_context": {"channel": "online", "amount": 89.9, "currency": "EUR"},
            "session_id": "s-42"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["session_id"], "s-42");
    assert!(body["error"].is_null());

    let answer = &body["agent_response"];
    assert_eq!(answer["info_not_found"], false);
    let cited: Vec<&str> = answer["citations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["doc_id"].as_str().unwrap())
        .collect();
    assert!(cited.contains(&"opposition_carte_bancaire"));
    assert!(cited.contains(&"contestation_paiement_carte"));
    assert!(answer["risk_flags"]
        .as_array()
        .unwrap()
        .contains(&json!("reversible_card_payment")));

    handle.abort();
}

#[tokio::test]
async fn test_chat_rejects_bad_requests() {
    let (port, handle) = start(&bundled_docs()).await;
    let client = reqwest::Client::new();
    ingest(&client, port).await;
    let url = format!("http://127.0.0.1:{}/chat", port);

    let resp = client
        .post(&url)
        .json(&json!({"user_message": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(&url)
        .json(&json!({"user_message": "x".repeat(2001)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(&url)
        .json(&json!({
            "user_message": "fraude",
            "transaction_context": {"channel": "virement", "amount": -10}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handle.abort();
}

#[tokio::test]
async fn test_documents_and_reingest() {
    let tmp = TempDir::new().unwrap();
    for entry in std::fs::read_dir(bundled_docs()).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(entry.path(), tmp.path().join(entry.file_name())).unwrap();
    }
    let (port, handle) = start(tmp.path()).await;
    let client = reqwest::Client::new();
    ingest(&client, port).await;

    let docs_url = format!("http://127.0.0.1:{}/documents", port);
    let body: Value = client.get(&docs_url).send().await.unwrap().json().await.unwrap();
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| d["chunk_count"].as_u64().unwrap() > 0));

    // Unchanged corpus: no rebuild
    let report = ingest(&client, port).await;
    assert_eq!(report["rebuilt"], false);

    std::fs::write(
        tmp.path().join("cheque_perdu.md"),
        "# Chèque perdu\n\nEn cas de perte d'un chéquier, faites opposition aux chèques concernés.\n\n- Appelez votre agence pour l'opposition au chèque.\n",
    )
    .unwrap();
    let report = ingest(&client, port).await;
    assert_eq!(report["rebuilt"], true);
    assert_eq!(report["documents_indexed"], 4);

    let resp = client
        .post(format!("http://127.0.0.1:{}/ingest", port))
        .json(&json!({"force_reindex": true}))
        .send()
        .await
        .unwrap();
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["rebuilt"], true);

    handle.abort();
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let (port, handle) = start(&bundled_docs()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .header("origin", "http://example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap()),
        Some("*")
    );

    handle.abort();
}
