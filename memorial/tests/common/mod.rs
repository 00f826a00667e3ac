#![allow(dead_code)]

use memorial::{
    api::{build_router, AppState, VIEWER_HEADER},
    auth::PrivilegePolicy,
    config::{default_buckets, Backend, Bootstrap, Config, PaymentNumbers},
};
use reqwest::{header, Method, RequestBuilder, Response};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;

pub const ADMIN_EMAIL: &str = "admin@example.org";
pub const ADMIN_PASSWORD: &str = "correct horse battery";

pub const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0, 0,
    1, 0, 0, 0, 1, 8, 6, 0, 0, 0,
];

pub struct Server {
    pub addr: SocketAddr,
    pub handle: JoinHandle<()>,
    pub state: AppState,
    pub tmp: tempfile::TempDir,
}

impl Server {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn visitor(&self) -> Visitor {
        Visitor {
            client: reqwest::Client::new(),
            base: self.url(""),
            viewer: None,
            token: None,
        }
    }

    pub async fn admin(&self) -> Visitor {
        let mut v = self.visitor();
        let resp = v
            .send(v.request(Method::POST, "/api/auth/login").json(&serde_json::json!({
                "email": ADMIN_EMAIL,
                "password": ADMIN_PASSWORD,
            })))
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["moderator"], true);
        v.token = body["access_token"].as_str().map(String::from);
        v
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_server(visitor_uploads: bool) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
        backend: Backend::Memory,
        remote: None,
        buckets: default_buckets(),
        public_base: format!("http://{}", addr),
        max_upload_mb: 5,
        visitor_uploads,
        privilege: PrivilegePolicy::default(),
        bootstrap: Some(Bootstrap {
            email: ADMIN_EMAIL.into(),
            password: ADMIN_PASSWORD.into(),
        }),
        payments: PaymentNumbers::default(),
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let handle = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    Server {
        addr,
        handle,
        state,
        tmp,
    }
}

/// A browser-like client that keeps its viewer id and bearer token.
pub struct Visitor {
    pub client: reqwest::Client,
    pub base: String,
    pub viewer: Option<String>,
    pub token: Option<String>,
}

impl Visitor {
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(v) = &self.viewer {
            req = req.header(VIEWER_HEADER, v);
        }
        if let Some(t) = &self.token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        req
    }

    pub async fn send(&mut self, req: RequestBuilder) -> Response {
        let resp = req.send().await.unwrap();
        if let Some(v) = resp.headers().get(VIEWER_HEADER) {
            self.viewer = v.to_str().ok().map(String::from);
        }
        resp
    }

    pub async fn get(&mut self, path: &str) -> (u16, Value) {
        let resp = self.send(self.request(Method::GET, path)).await;
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    pub async fn delete(&mut self, path: &str) -> (u16, Value) {
        let resp = self.send(self.request(Method::DELETE, path)).await;
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    pub async fn post_json(&mut self, path: &str, body: Value) -> (u16, Value) {
        let resp = self.send(self.request(Method::POST, path).json(&body)).await;
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    pub async fn post_form(&mut self, path: &str, form: reqwest::multipart::Form) -> (u16, Value) {
        let resp = self.send(self.request(Method::POST, path).multipart(form)).await;
        (resp.status().as_u16(), resp.json().await.unwrap())
    }
}

pub fn tribute_form(author: &str, message: &str) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("author_name", author.to_string())
        .text("message", message.to_string())
}

pub fn png_part(name: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(PNG.to_vec())
        .file_name(name.to_string())
        .mime_str("image/png")
        .unwrap()
}
