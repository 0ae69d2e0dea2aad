//! End-to-end tests for the prompt server
//!
//! Drives a real `PromptServer` (MCP loop plus directory watcher) over
//! in-memory pipes while editing the prompts directory on disk.

use std::fs;
use std::time::Duration;

use prompt_engine::args::static_env;
use prompt_engine::mcp::{PROMPTS_LIST_CHANGED, ServerOptions};
use prompt_engine::server::PromptServer;
use prompt_engine::watcher::WatcherConfig;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Client {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    next_id: u64,
    notifications: Vec<String>,
}

impl Client {
    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn next_message(&mut self) -> Value {
        let line = tokio::time::timeout(WAIT, self.output.next_line())
            .await
            .expect("Timed out waiting for server")
            .unwrap()
            .expect("Server closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// Send a request and return its response, collecting notifications seen on the way
    async fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        loop {
            let message = self.next_message().await;
            if message["id"] == json!(id) {
                return message;
            }
            if let Some(method) = message["method"].as_str() {
                self.notifications.push(method.to_string());
            }
        }
    }

    async fn wait_for_notification(&mut self, method: &str) {
        if self.notifications.iter().any(|m| m == method) {
            return;
        }
        loop {
            let message = self.next_message().await;
            if message["method"] == json!(method) {
                return;
            }
        }
    }

    async fn prompt_names(&mut self) -> Vec<String> {
        let response = self.request("prompts/list", json!({})).await;
        response["result"]["prompts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap().to_string())
            .collect()
    }
}

struct Harness {
    dir: TempDir,
    client: Client,
    cancel: CancellationToken,
    task: JoinHandle<eyre::Result<()>>,
}

impl Harness {
    fn start(files: &[(&str, &str)], env: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let env: Vec<(String, String)> = env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let server = PromptServer::with_env(dir.path(), ServerOptions::default(), WatcherConfig::default(), static_env(env))
            .expect("Failed to start server");

        let (input, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, output) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(server.serve(server_in, server_out, cancel.clone()));

        Self {
            dir,
            client: Client {
                input,
                output: BufReader::new(output).lines(),
                next_id: 0,
                notifications: Vec::new(),
            },
            cancel,
            task,
        }
    }

    /// Replace a file in one rename so the watcher never sees it half written
    fn write(&self, name: &str, content: &str) {
        let staging = self.dir.path().join(format!(".{name}.tmp"));
        fs::write(&staging, content).unwrap();
        fs::rename(&staging, self.dir.path().join(name)).unwrap();
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("Server did not stop")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_handshake_list_and_get() {
    let mut h = Harness::start(
        &[
            ("greeting.tmpl", "{{!-- Greets someone --}}\nHello {{name}}!"),
            ("signed.tmpl", "{{body}}\n-- {{author}}"),
        ],
        &[("AUTHOR", "the team")],
    );

    let init = h
        .client
        .request("initialize", json!({"protocolVersion": "2024-11-05", "capabilities": {}}))
        .await;
    assert_eq!(init["result"]["capabilities"]["prompts"]["listChanged"], json!(true));
    assert_eq!(init["result"]["serverInfo"]["name"], json!("prompt-engine"));
    h.client
        .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    let list = h.client.request("prompts/list", json!({})).await;
    let prompts = list["result"]["prompts"].as_array().unwrap();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0]["name"], json!("greeting"));
    assert_eq!(prompts[0]["description"], json!("Greets someone"));
    assert_eq!(prompts[0]["arguments"][0]["name"], json!("name"));
    // author comes from the environment, so only body is requested
    let signed_args: Vec<&str> = prompts[1]["arguments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(signed_args, vec!["body"]);

    let get = h
        .client
        .request("prompts/get", json!({"name": "greeting", "arguments": {"name": "John"}}))
        .await;
    assert_eq!(get["result"]["messages"][0]["role"], json!("user"));
    assert_eq!(get["result"]["messages"][0]["content"]["text"], json!("Hello John!"));

    let signed = h
        .client
        .request("prompts/get", json!({"name": "signed", "arguments": {"body": "Done."}}))
        .await;
    assert_eq!(signed["result"]["messages"][0]["content"]["text"], json!("Done.\n-- the team"));

    let missing = h.client.request("prompts/get", json!({"name": "nope"})).await;
    assert_eq!(missing["error"]["code"], json!(-32602));

    h.stop().await;
}

#[tokio::test]
async fn test_structured_arguments_select_branch() {
    let mut h = Harness::start(
        &[("flag.tmpl", "{{#if show_extra}}extra{{else}}plain{{/if}}")],
        &[],
    );

    let on = h
        .client
        .request("prompts/get", json!({"name": "flag", "arguments": {"show_extra": "true"}}))
        .await;
    assert_eq!(on["result"]["messages"][0]["content"]["text"], json!("extra"));

    let off = h
        .client
        .request("prompts/get", json!({"name": "flag", "arguments": {"show_extra": "false"}}))
        .await;
    assert_eq!(off["result"]["messages"][0]["content"]["text"], json!("plain"));

    h.stop().await;
}

#[tokio::test]
async fn test_new_file_is_served_after_change() {
    let mut h = Harness::start(&[("a.tmpl", "a")], &[]);
    assert_eq!(h.client.prompt_names().await, vec!["a"]);

    h.write("b.tmpl", "Bee {{thing}}");
    h.client.wait_for_notification(PROMPTS_LIST_CHANGED).await;

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let get = h
            .client
            .request("prompts/get", json!({"name": "b", "arguments": {"thing": "hive"}}))
            .await;
        if get["result"]["messages"][0]["content"]["text"] == json!("Bee hive") {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "b never became servable: {get}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(h.client.prompt_names().await, vec!["a", "b"]);

    fs::remove_file(h.dir.path().join("a.tmpl")).unwrap();
    let deadline = tokio::time::Instant::now() + WAIT;
    while h.client.prompt_names().await != vec!["b"] {
        assert!(tokio::time::Instant::now() < deadline, "a was never removed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    h.stop().await;
}

#[tokio::test]
async fn test_broken_edit_keeps_previous_prompts() {
    let mut h = Harness::start(&[("greeting.tmpl", "Hello {{name}}!")], &[]);

    h.write("broken.tmpl", "{{#if ready}}never closed");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.client.prompt_names().await, vec!["greeting"]);
    let get = h
        .client
        .request("prompts/get", json!({"name": "greeting", "arguments": {"name": "Ann"}}))
        .await;
    assert_eq!(get["result"]["messages"][0]["content"]["text"], json!("Hello Ann!"));

    // fixing the file brings both prompts back
    h.write("broken.tmpl", "{{#if ready}}ready{{/if}}");
    let deadline = tokio::time::Instant::now() + WAIT;
    while h.client.prompt_names().await != vec!["broken", "greeting"] {
        assert!(tokio::time::Instant::now() < deadline, "fixed file never loaded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    h.stop().await;
}

#[tokio::test]
async fn test_cycle_introduced_later_keeps_previous_prompts() {
    let mut h = Harness::start(&[("a.tmpl", "{{> _b}}"), ("_b.tmpl", "b {{topic}}")], &[]);
    assert_eq!(h.client.prompt_names().await, vec!["a"]);

    h.write("_c.tmpl", "c {{> _b}}");
    h.write("_b.tmpl", "b {{> _c}}");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let list = h.client.request("prompts/list", json!({})).await;
    assert_eq!(list["result"]["prompts"][0]["arguments"][0]["name"], json!("topic"));

    h.stop().await;
}

#[tokio::test]
async fn test_client_hangup_stops_server() {
    let h = Harness::start(&[("a.tmpl", "a")], &[]);
    let Harness {
        dir: _dir,
        client,
        cancel,
        task,
    } = h;

    drop(client);
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert!(cancel.is_cancelled());
}
