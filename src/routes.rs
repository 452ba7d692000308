use std::convert::Infallible;
use std::sync::Arc;

use clap::ValueEnum;
use log::{debug, error, trace};
use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;
use warp::http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode};
use warp::hyper::body::Bytes;
use warp::path::FullPath;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::cors::CorsPolicy;
use crate::inventory;
use crate::stocksync::{Error, ErrorBody, Result, Snapshot, StockSync};
use crate::time::Timestamp;

/// Which route table serves `/api/data` and `/api/sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// Everyone reads and writes one shared document, no login needed.
    Public,
    /// Each account reads and writes its own document, bearer token required.
    Accounts,
}

pub struct Router {
    sync: StockSync,
    mode: DataMode,
    cors: CorsPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    success: bool,
    message: &'static str,
    time: Timestamp,
    store_configured: bool,
    store_connected: bool,
    mode: DataMode,
}

#[derive(Debug, Serialize)]
struct Echo<'a> {
    success: bool,
    message: &'static str,
    url: &'a str,
    method: &'a str,
    time: Timestamp,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataReply {
    success: bool,
    data: Value,
    last_sync: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncReply {
    success: bool,
    message: &'static str,
    sync_time: Timestamp,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct SessionReply {
    success: bool,
    token: String,
    data: Option<Value>,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct Ack {
    success: bool,
}

fn reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(e: &Error) -> Response {
    let status = StatusCode::from(e);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {e:?}");
    }

    reply(status, &ErrorBody::from(e))
}

impl From<Snapshot> for DataReply {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            success: true,
            data: snapshot.data,
            last_sync: snapshot.last_sync,
        }
    }
}

fn synced(sync_time: Timestamp) -> SyncReply {
    SyncReply {
        success: true,
        message: "同步成功",
        sync_time,
    }
}

impl Router {
    pub fn new(sync: StockSync, mode: DataMode, cors: CorsPolicy) -> Self {
        Self { sync, mode, cors }
    }

    /// Answers one request. Never fails: errors become JSON bodies, and
    /// every response carries the CORS headers.
    pub async fn handle(&self, method: &Method, path: &str, auth: Option<&str>, body: &[u8]) -> Response {
        let result = if *method == Method::OPTIONS {
            Ok(reply(StatusCode::OK, &Ack { success: true }))
        } else {
            self.route(method, path, auth, body).await
        };

        let mut response = result.unwrap_or_else(|e| error_reply(&e));
        self.cors.apply(response.headers_mut());
        response
    }

    async fn route(&self, method: &Method, path: &str, auth: Option<&str>, body: &[u8]) -> Result<Response> {
        use DataMode::{Accounts, Public};

        trace!("{method} {path} ({:?} mode)", self.mode);

        match (self.mode, method.as_str(), path) {
            (_, "GET", "/api/health") => Ok(self.health()),
            (_, "GET", "/api/test") => Ok(reply(
                StatusCode::OK,
                &Echo {
                    success: true,
                    message: "API 测试成功",
                    url: path,
                    method: method.as_str(),
                    time: Timestamp::now(),
                },
            )),

            (_, "POST", "/api/register") => {
                let session = self.sync.register(&inventory::parse_body(body)).await?;

                Ok(reply(
                    StatusCode::CREATED,
                    &SessionReply {
                        success: true,
                        token: session.token,
                        data: None,
                        message: "注册成功",
                    },
                ))
            }
            (_, "POST", "/api/login") => {
                let session = self.sync.login(&inventory::parse_body(body)).await?;

                Ok(reply(
                    StatusCode::OK,
                    &SessionReply {
                        success: true,
                        token: session.token,
                        data: Some(session.data),
                        message: "登录成功",
                    },
                ))
            }

            (Public, "GET", "/api/data") => {
                let snapshot = self.sync.shared_data().await?;
                Ok(reply(StatusCode::OK, &DataReply::from(snapshot)))
            }
            (Public, "POST", "/api/sync") => {
                let now = self.sync.sync_shared(&inventory::parse_body(body)).await?;
                Ok(reply(StatusCode::OK, &synced(now)))
            }

            (Accounts, "GET", "/api/data") => {
                let authed = self.sync.authenticate(auth)?;
                let snapshot = authed.data().await?;
                Ok(reply(StatusCode::OK, &DataReply::from(snapshot)))
            }
            (Accounts, "POST", "/api/sync") => {
                let authed = self.sync.authenticate(auth)?;
                let now = authed.sync(&inventory::parse_body(body)).await?;
                Ok(reply(StatusCode::OK, &synced(now)))
            }

            _ => Err(Error::NoRoute {
                url: path.into(),
                method: method.as_str().into(),
            }),
        }
    }

    fn health(&self) -> Response {
        let store = self.sync.store();

        reply(
            StatusCode::OK,
            &Health {
                success: true,
                message: "服务正常运行",
                time: Timestamp::now(),
                store_configured: store.configured(),
                store_connected: store.connected(),
                mode: self.mode,
            },
        )
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Largest request body accepted, in bytes.
pub const MAX_BODY: u64 = 16 * 1024 * 1024;

#[derive(Debug)]
struct BodyTooLarge;

impl warp::reject::Reject for BodyTooLarge {}

// unlike `warp::body::content_length_limit`, a request without a length is let through
fn body_limit() -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and_then(|len: Option<u64>| async move {
            match len {
                Some(len) if len > MAX_BODY => {
                    debug!("refusing {len} byte body");
                    Err(warp::reject::custom(BodyTooLarge))
                }
                _ => Ok(()),
            }
        })
        .untuple_one()
}

/// The whole service as one warp filter: every method and path lands in
/// [`Router::handle`].
pub fn routes(router: Arc<Router>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let cors = router.cors;

    let query = warp::query::raw()
        .map(|query: String| Some(query))
        .or(warp::any().map(|| None::<String>))
        .unify();

    let handle = warp::method()
        .and(warp::path::full())
        .and(query)
        .and(warp::header::headers_cloned())
        .and(body_limit())
        .and(warp::body::bytes())
        .and_then(
            move |method: Method, path: FullPath, query: Option<String>, headers: HeaderMap, body: Bytes| {
                let router = Arc::clone(&router);
                async move {
                    // routes compare against the whole request target, query included
                    let target = match query {
                        Some(query) => format!("{}?{query}", path.as_str()),
                        None => path.as_str().to_string(),
                    };
                    let auth = authorization(&headers);
                    let response = router
                        .handle(&method, &target, auth.as_deref(), &body)
                        .await;
                    Ok::<_, Rejection>(response)
                }
            },
        );

    handle
        .recover(move |rejection: Rejection| async move {
            let e = match rejection.find::<BodyTooLarge>() {
                Some(_) => Error::PayloadTooLarge,
                None => Error::Internal(format!("{rejection:?}")),
            };
            let mut response = error_reply(&e);
            cors.apply(response.headers_mut());
            Ok::<_, Infallible>(response)
        })
        .unify()
        .with(warp::log("stocksync::http"))
}

#[cfg(test)]
mod test {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use warp::http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN};

    use crate::mock;
    use crate::store::Store;

    fn filter(
        mode: DataMode,
    ) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + 'static {
        let router = Router::new(mock::stocksync(), mode, CorsPolicy::Credentials);
        routes(Arc::new(router))
    }

    fn json_body(res: &warp::http::Response<Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    async fn register<F>(filter: &F, username: &str, password: &str) -> String
    where
        F: Filter + 'static,
        F::Extract: Reply + Send,
    {
        let res = warp::test::request()
            .method("POST")
            .path("/api/register")
            .json(&json!({ "username": username, "password": password }))
            .reply(filter)
            .await;

        assert_eq!(res.status(), StatusCode::CREATED);
        json_body(&res)["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_store_state() {
        let res = warp::test::request()
            .path("/api/health")
            .reply(&filter(DataMode::Public))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(&res);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["storeConfigured"], json!(true));
        assert_eq!(body["storeConnected"], json!(true));
        assert_eq!(body["mode"], json!("public"));

        let time = body["time"].as_str().unwrap();
        assert!(time.parse::<Timestamp>().is_ok(), "not ISO-8601: {time}");
    }

    #[tokio::test]
    async fn test_route_echoes_request() {
        let res = warp::test::request()
            .path("/api/test")
            .reply(&filter(DataMode::Public))
            .await;

        let body = json_body(&res);
        assert_eq!(body["url"], json!("/api/test"));
        assert_eq!(body["method"], json!("GET"));
    }

    #[tokio::test]
    async fn preflight_is_acknowledged_with_cors() {
        let res = warp::test::request()
            .method("OPTIONS")
            .path("/anything/at/all")
            .reply(&filter(DataMode::Accounts))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(&res), json!({ "success": true }));
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let res = warp::test::request()
            .method("POST")
            .path("/api/sync")
            .header("content-length", (MAX_BODY + 1).to_string())
            .reply(&filter(DataMode::Public))
            .await;

        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(&res), json!({ "error": "请求体过大" }));
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn unknown_routes_echo_path_and_method() {
        let filter = filter(DataMode::Public);

        let res = warp::test::request()
            .method("DELETE")
            .path("/api/unknown")
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(&res),
            json!({ "error": "接口不存在", "url": "/api/unknown", "method": "DELETE" })
        );
        assert_eq!(res.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        // paths match literally
        for path in ["/api/health/", "/API/health", "/api/data/1"] {
            let res = warp::test::request().path(path).reply(&filter).await;
            assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
        }

        // the query string is part of what's matched, and echoed back
        let res = warp::test::request()
            .path("/api/health?x=1")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(&res)["url"], "/api/health?x=1");

        // and so do methods
        let res = warp::test::request()
            .method("POST")
            .path("/api/health")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn account_scenario() {
        let filter = filter(DataMode::Accounts);
        let token = register(&filter, "alice", "p1").await;
        let bearer = format!("Bearer {token}");

        let res = warp::test::request()
            .path("/api/data")
            .header("authorization", &bearer)
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(&res)["data"]["goodsList"], json!([]));

        let res = warp::test::request()
            .method("POST")
            .path("/api/sync")
            .header("authorization", &bearer)
            .json(&json!({ "data": { "goodsList": [{ "name": "box" }] } }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(&res)["message"], json!("同步成功"));

        let res = warp::test::request()
            .path("/api/data")
            .header("authorization", &bearer)
            .reply(&filter)
            .await;
        let body = json_body(&res);
        assert_eq!(body["data"], json!({ "goodsList": [{ "name": "box" }] }));
        assert!(body["lastSync"].is_string());
    }

    #[tokio::test]
    async fn login_returns_token_and_data() {
        let filter = filter(DataMode::Accounts);
        register(&filter, "bob", "hunter2").await;

        let res = warp::test::request()
            .method("POST")
            .path("/api/login")
            .json(&json!({ "username": "bob", "password": "hunter2" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(&res);
        let token = body["token"].as_str().unwrap();
        assert_eq!(body["data"], inventory::default_document());

        let res = warp::test::request()
            .path("/api/data")
            .header("authorization", format!("Bearer {token}"))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request()
            .method("POST")
            .path("/api/login")
            .json(&json!({ "username": "bob", "password": "wrong" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_usernames_conflict() {
        let filter = filter(DataMode::Accounts);
        register(&filter, "carol", "p1").await;

        let res = warp::test::request()
            .method("POST")
            .path("/api/register")
            .json(&json!({ "username": "carol", "password": "p2" }))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(&res), json!({ "error": "用户名已存在" }));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let filter = filter(DataMode::Accounts);

        let res = warp::test::request()
            .method("POST")
            .path("/api/register")
            .json(&json!({ "username": "dave" }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&res), json!({ "error": "账号和密码不能为空" }));

        // malformed bodies are read as `{}`
        let res = warp::test::request()
            .method("POST")
            .path("/api/login")
            .body("{username: oops")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn account_routes_need_a_valid_token() {
        let filter = filter(DataMode::Accounts);
        let token = register(&filter, "erin", "p1").await;

        for header in [None, Some("Bearer".to_string()), Some("Bearer garbage".to_string())] {
            let mut req = warp::test::request().path("/api/data");
            if let Some(header) = header {
                req = req.header("authorization", header);
            }
            let res = req.reply(&filter).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }

        // authentication is checked before the payload
        let res = warp::test::request()
            .method("POST")
            .path("/api/sync")
            .json(&json!({}))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = warp::test::request()
            .method("POST")
            .path("/api/sync")
            .header("authorization", format!("Bearer {token}"))
            .json(&json!({}))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&res), json!({ "error": "数据不能为空" }));
    }

    #[tokio::test]
    async fn token_for_missing_account_is_not_found() {
        let filter = filter(DataMode::Accounts);
        let token = mock::tokens()
            .issue(uuid::Uuid::new_v4(), "ghost")
            .unwrap();

        let res = warp::test::request()
            .path("/api/data")
            .header("authorization", format!("Bearer {token}"))
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(&res), json!({ "error": "用户不存在" }));
    }

    #[tokio::test]
    async fn public_mode_shares_one_document() {
        let filter = filter(DataMode::Public);

        let res = warp::test::request().path("/api/data").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::OK);
        let first = json_body(&res);
        assert_eq!(first["data"], inventory::default_document());

        // reads are stable until someone syncs
        let res = warp::test::request().path("/api/data").reply(&filter).await;
        assert_eq!(json_body(&res), first);

        let res = warp::test::request()
            .method("POST")
            .path("/api/sync")
            .body("")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&res), json!({ "error": "数据不能为空" }));

        let doc = json!({ "goodsList": [{ "name": "crate", "qty": 3 }], "typeData": {} });
        let res = warp::test::request()
            .method("POST")
            .path("/api/sync")
            .json(&json!({ "data": doc }))
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(json_body(&res)["syncTime"].is_string());

        // no token needed, and a token is ignored
        let res = warp::test::request()
            .path("/api/data")
            .header("authorization", "Bearer whatever")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(&res)["data"], doc);
    }

    #[tokio::test]
    async fn unconfigured_store_explains_itself() {
        let sync = StockSync::new(Store::new(None, Duration::from_secs(1)), mock::tokens());
        let router = Router::new(sync, DataMode::Public, CorsPolicy::Standard);
        let filter = routes(Arc::new(router));

        let res = warp::test::request().path("/api/data").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(&res),
            json!({ "error": "数据库未配置", "message": "请设置 STORE_URL 环境变量" })
        );
        assert!(!res.headers().contains_key(ACCESS_CONTROL_ALLOW_CREDENTIALS));

        let res = warp::test::request().path("/api/health").reply(&filter).await;
        let body = json_body(&res);
        assert_eq!(body["storeConfigured"], json!(false));
        assert_eq!(body["storeConnected"], json!(false));
    }

    #[tokio::test]
    async fn store_connects_lazily() {
        let sync = StockSync::new(
            Store::new(Some(crate::backend::StoreUrl::Memory), Duration::from_secs(1)),
            mock::tokens(),
        );
        let filter = routes(Arc::new(Router::new(sync, DataMode::Public, CorsPolicy::Credentials)));

        let res = warp::test::request().path("/api/health").reply(&filter).await;
        assert_eq!(json_body(&res)["storeConnected"], json!(false));

        warp::test::request().path("/api/data").reply(&filter).await;

        let res = warp::test::request().path("/api/health").reply(&filter).await;
        assert_eq!(json_body(&res)["storeConnected"], json!(true));
    }
}
