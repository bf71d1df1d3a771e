//! HTTP-level tests of the dashboard router.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use ctidashy::config::OpenCtiConfig;
use ctidashy::opencti::{
    IntelApi, IntelBackend, NewOpenCtiUser, OpenCtiGroup, OpenCtiUser, SearchHit,
};
use ctidashy::{router, AppState, Config, Error, Result};

const HEADER: &str = "Filename,CTIfeed,MD5Hash,DateTime,FileSize,FlowUUID,Resend\n";

struct FakeApi;

#[async_trait]
impl IntelApi for FakeApi {
    async fn about_version(&self) -> Result<String> {
        Ok("6.0.0".to_string())
    }

    async fn search(&self, term: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        Ok(vec![SearchHit {
            id: "indicator--1".to_string(),
            kind: Some("Indicator".to_string()),
            name: Some(term.to_string()),
            confidence: Some(75),
            ..SearchHit::default()
        }])
    }

    async fn list_users(&self, _search: &str) -> Result<Vec<OpenCtiUser>> {
        Ok(vec![OpenCtiUser {
            id: "user-1".to_string(),
            name: "feed-bot".to_string(),
            ..OpenCtiUser::default()
        }])
    }

    async fn user_groups(&self, _user_id: &str) -> Result<Vec<OpenCtiGroup>> {
        Ok(vec![OpenCtiGroup {
            id: "group-1".to_string(),
            name: "Connectors".to_string(),
        }])
    }

    async fn create_user(&self, _user: &NewOpenCtiUser) -> Result<String> {
        Ok("user-2".to_string())
    }

    async fn delete_user(&self, _user_id: &str) -> Result<()> {
        Ok(())
    }

    async fn add_group_member(&self, _group_id: &str, _user_id: &str) -> Result<()> {
        Ok(())
    }
}

struct FakeBackend;

impl IntelBackend for FakeBackend {
    fn client(&self, config: &OpenCtiConfig) -> Result<Arc<dyn IntelApi>> {
        if !config.is_configured() {
            return Err(Error::not_configured("OpenCTI URL or API key"));
        }
        Ok(Arc::new(FakeApi))
    }
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        for sub in ["low", "high", "resend_manifests", "backup", "queue", "storage", "tor"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }

        let mut config = Config::default();
        config.paths.low_side_manifest_dir = Some(root.join("low"));
        config.paths.high_side_manifest_dir = Some(root.join("high"));
        config.paths.resend_manifest_dir = Some(root.join("resend_manifests"));
        config.paths.feed_backup_dir = Some(root.join("backup"));
        config.paths.resend_folder = Some(root.join("queue"));
        config.paths.storage_folder = Some(root.join("storage"));
        config.paths.dupe_scan_folder = Some(root.join("storage"));
        config.paths.tor_csv_dir = Some(root.join("tor"));
        config.accounts.user_file = Some(root.join("users.txt"));
        config.accounts.preset_file = Some(root.join("user_template.csv"));
        config.accounts.watchlist_file = Some(root.join("watchlist.csv"));
        config.opencti = OpenCtiConfig::with_credentials("opencti.local:8080", "secret-key");
        adjust(&mut config);

        let state = AppState::new(config, root.join("config.toml"), Arc::new(FakeBackend));
        Self {
            root,
            app: router(state),
            _dir: dir,
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, cookie: Option<&str>, body: &Value) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .post_json(
                "/login",
                None,
                &json!({ "username": username, "password": password }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn test_health_needs_no_session() {
    let harness = Harness::new();
    let response = harness.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_panel_without_session_is_unauthorized() {
    let harness = Harness::new();
    let response = harness.get("/folder_size", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_login_with_bad_password() {
    let harness = Harness::new();
    let response = harness
        .post_json(
            "/login",
            None,
            &json!({ "username": "admin", "password": "wrong" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_and_logout() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;

    let me = body_json(harness.get("/me", Some(&cookie)).await).await;
    assert_eq!(me["username"], "admin");
    assert_eq!(me["panels"].as_array().unwrap().len(), 9);

    let response = harness.post_json("/logout", Some(&cookie), &json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness.get("/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disabled_feature_answers_before_auth() {
    let harness = Harness::with(|config| config.features.manifest_enabled = false);

    let response = harness.get("/manifest/compare", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Manifest feature is disabled");

    let cookie = harness.login("admin", "admin").await;
    let response = harness.get("/manifest", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_manifest_compare_reports_missing_rows() {
    let harness = Harness::new();
    write(
        &harness.path("low/CTImanifest_alpha.csv"),
        &format!(
            "{HEADER}a.txt,feedA,AAAA,Wed Jul 24 03:53:07 UTC 2024,10,f1,0\n\
             b.txt,feedA,BBBB,Wed Jul 24 03:53:07 UTC 2024,20,f1,0\n"
        ),
    );
    write(
        &harness.path("high/CTImanifest_alpha.csv"),
        &format!("{HEADER}a.txt,feedA,aaaa,Wed Jul 24 03:53:07 UTC 2024,10,f1,0\n"),
    );
    write(&harness.path("low/CTImanifest_beta.csv"), HEADER);

    let cookie = harness.login("admin", "admin").await;
    let response = harness.get("/manifest/compare", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["manifest"], "CTImanifest_alpha.csv");
    let differences = results[0]["differences"].as_array().unwrap();
    assert_eq!(differences.len(), 1);
    assert_eq!(differences[0]["MD5Hash"], "bbbb");
    assert_eq!(results[1]["error"], "Target file not found on high side");
}

#[tokio::test]
async fn test_manifest_report_status() {
    let harness = Harness::new();
    let rows = format!("{HEADER}a.txt,feedA,AAAA,Wed Jul 24 03:53:07 UTC 2024,10,f1,0\n");
    write(&harness.path("low/CTImanifest_alpha.csv"), &rows);
    write(&harness.path("high/CTImanifest_alpha.csv"), &rows);

    let cookie = harness.login("admin", "admin").await;
    let response = harness
        .get("/manifest/report?name=CTImanifest_alpha.csv", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["transfer_status"], "File Transferred");
}

#[tokio::test]
async fn test_resend_copies_and_bumps_counter() {
    let harness = Harness::new();
    write(&harness.path("backup/feedA/2024/report.txt"), "payload");
    write(
        &harness.path("resend_manifests/CTImanifest_alpha.csv"),
        &format!("{HEADER}report.txt,feedA,abcd,Wed Jul 24 03:53:07 UTC 2024,7,f1,\n"),
    );

    let cookie = harness.login("admin", "admin").await;
    let response = harness
        .post_json(
            "/resend",
            Some(&cookie),
            &json!({
                "Filename": "report.txt",
                "CTIfeed": "feedA",
                "DateTime": "Wed Jul 24 03:53:07 UTC 2024",
                "manifest": "CTImanifest_alpha.csv",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "File successfully copied to resend folder");

    let copied = fs::read_to_string(harness.path("queue/feedA/report.txt")).unwrap();
    assert_eq!(copied, "payload");
    let manifest = fs::read_to_string(harness.path("resend_manifests/CTImanifest_alpha.csv")).unwrap();
    assert!(manifest.lines().nth(1).unwrap().ends_with(",1"));
}

#[tokio::test]
async fn test_resend_requires_fields() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;
    let response = harness
        .post_json("/resend", Some(&cookie), &json!({ "Filename": "x.txt" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resend_missing_source_is_not_found() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;
    let response = harness
        .post_json(
            "/resend",
            Some(&cookie),
            &json!({
                "Filename": "gone.txt",
                "CTIfeed": "feedA",
                "DateTime": "Wed Jul 24 03:53:07 UTC 2024",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!harness.path("queue/feedA/gone.txt").exists());
}

#[tokio::test]
async fn test_search_through_backend() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;

    let response = harness.get("/search?q=emotet", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["results"][0]["name"], "emotet");
    assert_eq!(body["results"][0]["type"], "Indicator");

    let response = harness.get("/search?q=%20", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_without_opencti_settings() {
    let harness = Harness::with(|config| config.opencti = OpenCtiConfig::default());
    let cookie = harness.login("admin", "admin").await;
    let response = harness.get("/search?q=emotet", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_new_user_only_gets_search_panel() {
    let harness = Harness::new();
    let admin = harness.login("admin", "admin").await;
    let response = harness
        .post_json(
            "/user_mgmt/dashy_users",
            Some(&admin),
            &json!({ "username": "analyst", "password": "pw" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let analyst = harness.login("analyst", "pw").await;
    let response = harness.get("/settings", Some(&analyst)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = harness.get("/search?q=x", Some(&analyst)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .post_json(
            "/user_mgmt/dashy_users",
            Some(&admin),
            &json!({ "username": "analyst", "password": "other" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_settings_hide_api_key() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;
    let body = body_json(harness.get("/settings", Some(&cookie)).await).await;
    assert_eq!(body["config"]["opencti"]["api_key"], "********");
}

#[tokio::test]
async fn test_settings_save_and_connection_test() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;

    let response = harness
        .post_json("/settings", Some(&cookie), &json!({ "tor_enabled": null }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.path("config.toml").is_file());

    let response = harness.get("/tor/status", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness
        .post_json(
            "/settings/test_opencti",
            Some(&cookie),
            &json!({ "opencti_url": "https://cti.example", "opencti_api": "k" }),
        )
        .await;
    let body = body_json(response).await;
    assert_eq!(body["message"], "Connected successfully! OpenCTI version: 6.0.0");

    let response = harness
        .post_json(
            "/settings/test_opencti",
            Some(&cookie),
            &json!({ "opencti_url": "https://cti.example" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_folder_size_and_dupe_scan() {
    let harness = Harness::new();
    write(&harness.path("storage/feedA/one.txt"), "same");
    write(&harness.path("storage/feedA/two.txt"), "same");
    write(&harness.path("storage/feedB/three.txt"), "different");

    let cookie = harness.login("admin", "admin").await;
    let body = body_json(harness.get("/folder_size", Some(&cookie)).await).await;
    let storage = body["storage_folders"].as_array().unwrap();
    assert_eq!(storage.len(), 2);
    assert_eq!(storage[0]["name"], "feedA");
    assert_eq!(storage[0]["file_count"], 2);

    let response = harness
        .post_json("/data_dupe/start", Some(&cookie), &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["report"]["duplicate_count"], 1);

    let body = body_json(harness.get("/data_dupe", Some(&cookie)).await).await;
    assert_eq!(body["report"]["total_files"], 3);
}

#[tokio::test]
async fn test_tor_csv_is_served_as_text() {
    let harness = Harness::new();
    write(
        &harness.path("tor/nodes.csv"),
        "IP,IsExit,Name,OnionPort,DirPort,Flags,Uptime,Version,Contact,CollectionDate\n\
         1.2.3.4,True,relay1,9001,9030,Fast,10,0.4.8,ops,2024-07-24\n",
    );

    let cookie = harness.login("admin", "admin").await;
    let response = harness.get("/tor/nodes.csv", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert!(body_text(response).await.contains("relay1"));

    let body = body_json(harness.get("/tor/status", Some(&cookie)).await).await;
    assert_eq!(body["data"]["filename"], "nodes.csv");
}

#[tokio::test]
async fn test_opencti_users_flag_connectors() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;
    let body = body_json(harness.get("/user_mgmt/opencti_users", Some(&cookie)).await).await;
    assert_eq!(body["users"][0]["name"], "feed-bot");
    assert_eq!(body["users"][0]["is_connector"], true);
}

#[tokio::test]
async fn test_malformed_bodies_answer_with_json_errors() {
    let harness = Harness::new();
    let cookie = harness.login("admin", "admin").await;

    let cases = [
        (Some("application/json"), "{not json", StatusCode::BAD_REQUEST),
        (
            None,
            r#"{"Filename":"a.txt","CTIfeed":"feedA"}"#,
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ),
        (
            Some("application/json"),
            r#"{"Filename":5,"CTIfeed":"feedA","DateTime":"2024"}"#,
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
    ];
    for (content_type, body, status) in cases {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/resend")
            .header(COOKIE, &cookie);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let response = harness.send(builder.body(Body::from(body)).unwrap()).await;
        assert_eq!(response.status(), status, "body {body}");
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert!(!json["message"].as_str().unwrap().is_empty());
    }

    let response = harness
        .get("/manifest/report?name=a&name=b", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], "error");

    let response = harness
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/hash_search/not-a-number")
                .header(COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn test_manifest_compare_named_pair() {
    let harness = Harness::new();
    write(
        &harness.path("low/CTImanifest_alpha.csv"),
        &format!(
            "{HEADER}a.txt,feedA,AAAA,Wed Jul 24 03:53:07 UTC 2024,10,f1,0\n\
             b.txt,feedA,BBBB,Wed Jul 24 03:53:07 UTC 2024,20,f1,0\n"
        ),
    );
    write(
        &harness.path("high/CTImanifest_alpha_received.csv"),
        &format!("{HEADER}a.txt,feedA,aaaa,Wed Jul 24 03:53:07 UTC 2024,10,f1,0\n"),
    );

    let cookie = harness.login("admin", "admin").await;
    let response = harness
        .post_json(
            "/manifest/compare",
            Some(&cookie),
            &json!({
                "source_file": "CTImanifest_alpha.csv",
                "target_file": "CTImanifest_alpha_received.csv",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    let differences = body["differences"].as_array().unwrap();
    assert_eq!(differences.len(), 1);
    assert_eq!(differences[0]["Filename"], "b.txt");

    let response = harness
        .post_json(
            "/manifest/compare",
            Some(&cookie),
            &json!({ "source_file": "CTImanifest_alpha.csv", "target_file": "../x.csv" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .post_json(
            "/manifest/compare",
            Some(&cookie),
            &json!({ "source_file": "CTImanifest_alpha.csv" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .post_json(
            "/manifest/compare",
            Some(&cookie),
            &json!({ "source_file": "CTImanifest_alpha.csv", "target_file": "gone.csv" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_queued_resend() {
    let harness = Harness::new();
    write(&harness.path("queue/feedA/report.txt"), "payload");
    let cookie = harness.login("admin", "admin").await;

    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap()
    };

    let response = harness.send(delete("/resend/feedA/report.txt")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Queued file deleted");
    assert!(!harness.path("queue/feedA/report.txt").exists());

    let response = harness.send(delete("/resend/feedA/report.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = harness.send(delete("/resend/feedA/..")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_grant_single_panel() {
    let harness = Harness::new();
    let admin = harness.login("admin", "admin").await;
    harness
        .post_json(
            "/user_mgmt/dashy_users",
            Some(&admin),
            &json!({ "username": "analyst", "password": "pw" }),
        )
        .await;

    let response = harness
        .post_json(
            "/user_mgmt/dashy_users/analyst/panels/re_send",
            Some(&admin),
            &json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["panels"], json!(["api_search", "re_send"]));

    let analyst = harness.login("analyst", "pw").await;
    let response = harness.get("/resend", Some(&analyst)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .post_json(
            "/user_mgmt/dashy_users/analyst/panels/nonsense",
            Some(&admin),
            &json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .post_json(
            "/user_mgmt/dashy_users/nobody/panels/tor",
            Some(&admin),
            &json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disabled_resend_and_tor_are_forbidden() {
    let harness = Harness::with(|config| {
        config.features.resend_enabled = false;
        config.features.tor_enabled = false;
    });

    let response = harness
        .post_json("/resend", None, &json!({ "Filename": "a.txt" }))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["message"], "Resend feature is disabled");

    let response = harness.get("/tor/status", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["message"], "Tor feature is disabled");

    let cookie = harness.login("admin", "admin").await;
    let response = harness.get("/resend", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
