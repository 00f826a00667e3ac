use crate::auth::local::LocalAuth;
use crate::auth::rest::RestAuth;
use crate::auth::{Access, AuthGateway, AuthProvider, Session, User};
use crate::config::{Backend, Config};
use crate::donations::DonationDesk;
use crate::error::{ApiError, MemorialError, Result as MemorialResult};
use crate::gallery::GalleryFeed;
use crate::guestbook::{GuestbookFeed, Mode};
use crate::model::{PaymentMethod, RecordId};
use crate::notice::Notice;
use crate::storage::disk::DiskObjectStore;
use crate::storage::rest::RestObjectStore;
use crate::storage::{BucketChain, ImageUpload, ObjectStore, PLACEHOLDER_SVG};
use crate::store::memory::MemoryRecordStore;
use crate::store::rest::RestRecordStore;
use crate::store::sqlite::SqliteRecordStore;
use crate::store::{RecordStore, Records};
use crate::viewer::{spawn_housekeeping, Viewer, ViewerRegistry, IDLE_TIMEOUT, MAX_VIEWERS};
use anyhow::{Context, Result};
use axum::{
    body::StreamBody,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::OwnedMutexGuard;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

pub const VIEWER_HEADER: &str = "x-viewer-id";

// multipart framing around the file itself
const MULTIPART_SLACK: usize = 64 * 1024;
const HOUSEKEEPING_EVERY: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub records: Records,
    pub objects: Arc<dyn ObjectStore>,
    /// Set when objects live on local disk and are served by this process.
    pub disk: Option<Arc<DiskObjectStore>>,
    pub auth: AuthGateway,
    pub viewers: Arc<ViewerRegistry>,
    pub donations: DonationDesk,
}

impl AppState {
    /// Wire gateways for the configured backend.
    pub async fn new(config: Config) -> Result<Self> {
        let bootstrap = config
            .bootstrap
            .as_ref()
            .map(|b| (b.email.as_str(), b.password.as_str()));
        match (&config.backend, &config.remote) {
            (Backend::Remote, Some(remote)) => {
                let store: Arc<dyn RecordStore> = Arc::new(RestRecordStore::new(&remote.url, &remote.key)?);
                let objects = Arc::new(RestObjectStore::new(&remote.url, &remote.key));
                let auth = Arc::new(RestAuth::new(&remote.url, &remote.key));
                Ok(Self::with_parts(config, store, objects, None, auth))
            }
            (Backend::Remote, None) => anyhow::bail!("missing_store_credentials"),
            (backend, _) => {
                tokio::fs::create_dir_all(&config.data_dir)
                    .await
                    .with_context(|| format!("creating {}", config.data_dir.display()))?;
                let store: Arc<dyn RecordStore> = if *backend == Backend::Sqlite {
                    Arc::new(SqliteRecordStore::open(config.data_dir.join("memorial.db"))?)
                } else {
                    Arc::new(MemoryRecordStore::new())
                };
                let disk = Arc::new(
                    DiskObjectStore::open(
                        config.data_dir.join("storage"),
                        &config.buckets,
                        &config.public_base,
                    )
                    .await?,
                );
                let auth = Arc::new(LocalAuth::open(config.data_dir.join("auth.json"), bootstrap).await?);
                Ok(Self::with_parts(config, store, disk.clone(), Some(disk), auth))
            }
        }
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        disk: Option<Arc<DiskObjectStore>>,
        provider: Arc<dyn AuthProvider>,
    ) -> Self {
        let records = Records::new(store);
        let auth = AuthGateway::new(provider, config.privilege.clone());
        let donations = DonationDesk::new(records.clone(), config.payments.clone());
        let viewers = {
            let records = records.clone();
            let objects = objects.clone();
            let buckets = config.buckets.clone();
            let max = config.max_upload_bytes();
            let visitor_uploads = config.visitor_uploads;
            Arc::new(ViewerRegistry::new(
                move || Viewer {
                    guestbook: GuestbookFeed::new(
                        records.clone(),
                        objects.clone(),
                        BucketChain::new(buckets.clone()),
                        max,
                    ),
                    gallery: GalleryFeed::new(
                        records.clone(),
                        objects.clone(),
                        BucketChain::new(buckets.clone()),
                        max,
                        visitor_uploads,
                    ),
                },
                IDLE_TIMEOUT,
                MAX_VIEWERS,
            ))
        };
        Self {
            config: Arc::new(config),
            records,
            objects,
            disk,
            auth,
            viewers,
            donations,
        }
    }

    async fn access(&self, headers: &HeaderMap) -> Access {
        self.auth.access(bearer(headers)).await
    }

    fn viewer(&self, headers: &HeaderMap) -> MemorialResult<ViewerCtx> {
        let requested = headers.get(VIEWER_HEADER).and_then(|v| v.to_str().ok());
        let (id, viewer) = self.viewers.acquire(requested)?;
        Ok(ViewerCtx { id, viewer })
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// A locked viewer for the duration of one request.
struct ViewerCtx {
    id: Uuid,
    viewer: OwnedMutexGuard<Viewer>,
}

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
    notices: Vec<Notice>,
}

impl ViewerCtx {
    fn notices(&mut self) -> Vec<Notice> {
        let mut notices = self.viewer.guestbook.take_notices();
        notices.extend(self.viewer.gallery.take_notices());
        notices
    }

    fn finish<T: Serialize>(mut self, status: StatusCode, result: MemorialResult<T>) -> Response {
        let notices = self.notices();
        let viewer = [(
            HeaderName::from_static(VIEWER_HEADER),
            HeaderValue::from_str(&self.id.to_string()).unwrap_or(HeaderValue::from_static("")),
        )];
        match result {
            Ok(data) => (status, viewer, Json(Envelope { data, notices })).into_response(),
            Err(error) => (viewer, ApiError { error, notices }).into_response(),
        }
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/guestbook", get(admin_guestbook))
        .route("/api/admin/tributes/:id", delete(admin_delete_tribute))
        .route(
            "/api/admin/tributes/:id/comments/:comment_id",
            delete(admin_delete_comment),
        )
        .route("/api/admin/gallery/groups", post(admin_create_group))
        .route("/api/admin/gallery/:bucket/*name", delete(admin_delete_image))
        .route("/api/admin/donations", get(admin_donations))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            moderator_middleware,
        ));
    let body_limit = state.config.max_upload_bytes() as usize + MULTIPART_SLACK;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session))
        .route("/api/guestbook", get(guestbook))
        .route("/api/guestbook/tributes", post(submit_tribute))
        .route(
            "/api/guestbook/tributes/:id/comments",
            get(tribute_comments).post(submit_comment),
        )
        .route(
            "/api/guestbook/tributes/:id/form",
            post(open_form).delete(cancel_form),
        )
        .route("/api/gallery", get(gallery).post(upload_image))
        .route("/api/gallery/groups", get(gallery_groups))
        .route("/api/donations", post(start_donation))
        .route("/api/donations/:reference/confirm", post(confirm_donation))
        .route("/storage/:bucket/*name", get(serve_object))
        .route("/placeholder.svg", get(placeholder))
        .merge(admin)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn moderator_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    let access = state.access(req.headers()).await;
    if let Err(e) = access.require_moderator() {
        return e.into_response();
    }
    req.extensions_mut().insert(access);
    next.run(req).await
}

#[derive(Deserialize)]
struct LoginReq {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct SessionResp {
    #[serde(flatten)]
    session: Session,
    moderator: bool,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> MemorialResult<impl IntoResponse> {
    let session = state.auth.sign_in(&req.email, &req.password).await?;
    let moderator = state.auth.is_privileged(&session.user);
    Ok(Json(SessionResp { session, moderator }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> MemorialResult<StatusCode> {
    let token = bearer(&headers).ok_or(MemorialError::Unauthorized)?;
    state.auth.sign_out(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct CurrentSession {
    user: Option<User>,
    expires_at: Option<i64>,
    moderator: bool,
}

async fn session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> MemorialResult<impl IntoResponse> {
    let current = match bearer(&headers) {
        Some(token) => state.auth.get_session(token).await?,
        None => None,
    };
    let moderator = current
        .as_ref()
        .map(|s| state.auth.is_privileged(&s.user))
        .unwrap_or(false);
    Ok(Json(CurrentSession {
        expires_at: current.as_ref().map(|s| s.expires_at),
        user: current.map(|s| s.user),
        moderator,
    }))
}

async fn ensure_loaded(feed: &mut GuestbookFeed) {
    if feed.mode() == Mode::Unloaded {
        feed.load_feed().await;
    }
}

#[derive(Deserialize, Default)]
struct FeedQuery {
    #[serde(default)]
    reload: bool,
}

async fn guestbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<FeedQuery>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    if q.reload {
        feed.load_feed().await;
    } else {
        ensure_loaded(feed).await;
    }
    let view = feed.view();
    feed.take_reveal();
    ctx.finish(StatusCode::OK, Ok(view))
}

/// Text fields plus at most one file from a multipart body.
#[derive(Default)]
struct Form {
    fields: HashMap<String, String>,
    file: Option<ImageUpload>,
}

impl Form {
    fn text(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or_default()
    }

    fn optional(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

async fn read_form(mut multipart: Multipart, file_field: &str) -> MemorialResult<Form> {
    let unreadable = |_| MemorialError::validation("the upload could not be read or is too large");
    let mut form = Form::default();
    while let Some(field) = multipart.next_field().await.map_err(unreadable)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let file_name = field.file_name().map(|s| s.to_string());
            let content_type = field.content_type().map(|m| m.to_string());
            let data = field.bytes().await.map_err(unreadable)?;
            // browsers send an empty, unnamed part when no file is chosen
            if !data.is_empty() || file_name.as_deref().map_or(false, |n| !n.is_empty()) {
                form.file = Some(ImageUpload {
                    file_name,
                    content_type,
                    data,
                });
            }
        } else {
            let value = field.text().await.map_err(unreadable)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

#[derive(Serialize)]
struct Submitted<T> {
    #[serde(flatten)]
    item: T,
    reveal: Option<RecordId>,
}

async fn submit_tribute(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let result = async {
        let mut form = read_form(multipart, "image").await?;
        let image = form.file.take();
        let feed = &mut ctx.viewer.guestbook;
        let tribute = feed
            .submit_tribute(form.text("author_name"), form.text("message"), image)
            .await?;
        Ok::<_, MemorialError>(Submitted {
            item: tribute,
            reveal: feed.take_reveal(),
        })
    }
    .await;
    ctx.finish(StatusCode::CREATED, result)
}

async fn tribute_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RecordId>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    ensure_loaded(feed).await;
    let result = feed.load_comments(id).await.map(|c| c.to_vec());
    ctx.finish(StatusCode::OK, result)
}

async fn open_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RecordId>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    ensure_loaded(feed).await;
    let result = feed
        .open_comment_form(id)
        .map(|_| feed.thread(id).map(|t| t.form));
    ctx.finish(StatusCode::OK, result)
}

async fn cancel_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RecordId>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    let result = feed
        .cancel_comment_form(id)
        .map(|_| feed.thread(id).map(|t| t.form));
    ctx.finish(StatusCode::OK, result)
}

#[derive(Deserialize)]
struct CommentReq {
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    message: String,
}

async fn submit_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RecordId>,
    Json(req): Json<CommentReq>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    ensure_loaded(feed).await;
    let result = feed.submit_comment(id, &req.author_name, &req.message).await;
    ctx.finish(StatusCode::CREATED, result)
}

async fn admin_guestbook(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    feed.load_feed_with_comments().await;
    let view = feed.view();
    ctx.finish(StatusCode::OK, Ok(view))
}

async fn admin_delete_tribute(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    headers: HeaderMap,
    Path(id): Path<RecordId>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    ensure_loaded(feed).await;
    let mut result = feed.delete_tribute(&access, id).await;
    if matches!(result, Err(MemorialError::NotFound(_))) {
        // the viewer's copy of the feed may predate the tribute
        feed.load_feed().await;
        result = feed.delete_tribute(&access, id).await;
    }
    ctx.finish(StatusCode::OK, result.map(|_| id))
}

async fn admin_delete_comment(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    headers: HeaderMap,
    Path((id, comment_id)): Path<(RecordId, RecordId)>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let feed = &mut ctx.viewer.guestbook;
    ensure_loaded(feed).await;
    let mut result = feed.delete_comment(&access, id, comment_id).await;
    if matches!(result, Err(MemorialError::NotFound(_))) {
        feed.load_feed().await;
        result = feed.delete_comment(&access, id, comment_id).await;
    }
    ctx.finish(StatusCode::OK, result.map(|_| comment_id))
}

#[derive(Deserialize, Default)]
struct GalleryQuery {
    group: Option<String>,
}

async fn gallery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<GalleryQuery>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let gallery = &mut ctx.viewer.gallery;
    gallery.list(q.group.as_deref()).await;
    let view = gallery.view();
    ctx.finish(StatusCode::OK, Ok(view))
}

async fn gallery_groups(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let result = ctx.viewer.gallery.groups().await.map(|g| g.to_vec());
    ctx.finish(StatusCode::OK, result)
}

async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let access = state.access(&headers).await;
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let result = async {
        let mut form = read_form(multipart, "file").await?;
        let file = form
            .file
            .take()
            .ok_or_else(|| MemorialError::validation("please select an image to upload"))?;
        ctx.viewer
            .gallery
            .upload(&access, file, form.optional("caption"), form.optional("group"))
            .await
    }
    .await;
    ctx.finish(StatusCode::CREATED, result)
}

async fn admin_delete_image(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    headers: HeaderMap,
    Path((bucket, name)): Path<(String, String)>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let name = name.trim_start_matches('/').to_string();
    let result = ctx
        .viewer
        .gallery
        .delete(&access, &bucket, &name)
        .await
        .map(|_| name);
    ctx.finish(StatusCode::OK, result)
}

#[derive(Deserialize)]
struct GroupReq {
    name: String,
}

async fn admin_create_group(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
    headers: HeaderMap,
    Json(req): Json<GroupReq>,
) -> Response {
    let mut ctx = match state.viewer(&headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    let result = ctx.viewer.gallery.create_group(&access, &req.name).await;
    ctx.finish(StatusCode::CREATED, result)
}

#[derive(Deserialize)]
struct DonationReq {
    amount: u64,
    donor_name: Option<String>,
    method: PaymentMethod,
}

async fn start_donation(
    State(state): State<AppState>,
    Json(req): Json<DonationReq>,
) -> MemorialResult<impl IntoResponse> {
    let intent = state
        .donations
        .start(req.amount, req.donor_name.as_deref(), req.method)
        .await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

async fn confirm_donation(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> MemorialResult<impl IntoResponse> {
    Ok(Json(state.donations.confirm(&reference).await?))
}

async fn admin_donations(
    State(state): State<AppState>,
    Extension(access): Extension<Access>,
) -> MemorialResult<impl IntoResponse> {
    Ok(Json(state.donations.list(&access).await?))
}

async fn placeholder() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], PLACEHOLDER_SVG)
}

async fn serve_object(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let disk = state.disk.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let name = name.trim_start_matches('/');
    let path = disk
        .object_path(&bucket, name)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let mime = mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let content_type =
        HeaderValue::from_str(&mime).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    Ok((headers, StreamBody::new(ReaderStream::new(file))))
}

/// Run the HTTP server for the given configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;
    let state = AppState::new(config).await?;
    spawn_housekeeping(state.viewers.clone(), HOUSEKEEPING_EVERY);
    tracing::info!(%addr, "memorial listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_buckets, PaymentNumbers};
    use crate::storage::memory::MemoryObjectStore;
    use axum::body::Body;
    use tower::ServiceExt;

    async fn state(dir: &std::path::Path) -> AppState {
        let config = Config {
            bind: "127.0.0.1:0".into(),
            data_dir: dir.to_path_buf(),
            logging_enabled: false,
            backend: Backend::Memory,
            remote: None,
            buckets: default_buckets(),
            public_base: "http://localhost".into(),
            max_upload_mb: 5,
            visitor_uploads: false,
            privilege: Default::default(),
            bootstrap: None,
            payments: PaymentNumbers::default(),
        };
        let auth = LocalAuth::open(dir.join("auth.json"), None).await.unwrap();
        AppState::with_parts(
            config,
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryObjectStore::new(&default_buckets())),
            None,
            Arc::new(auth),
        )
    }

    #[tokio::test]
    async fn busy_viewer_gets_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).await;
        let (id, _held) = state.viewers.acquire(None).unwrap();
        let app = build_router(state.clone());
        let req = Request::builder()
            .uri("/api/guestbook")
            .header(VIEWER_HEADER, id.to_string())
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn viewer_id_is_issued() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path()).await);
        let req = Request::builder()
            .uri("/api/guestbook")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let id = resp.headers().get(VIEWER_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn storage_route_needs_disk_backend() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state(dir.path()).await);
        let req = Request::builder()
            .uri("/storage/images/1_a.png")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);
    }
}
