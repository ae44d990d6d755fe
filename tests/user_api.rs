// End-to-end tests for the user API through the full middleware chain
#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        extract::Request,
        http::{Method, StatusCode, header},
        response::Response,
    };
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tracetour::{
        adapters::{AppState, CorsPolicy, MemoryCacheRepository, MemoryUserRepository, build_router},
        core::{RepositoryLocator, RequestContext, User, UserId},
        ports::{UserRepository, UserRepositoryResult},
    };

    /// Counts primary store reads.
    struct SpyUsers {
        inner: MemoryUserRepository,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UserRepository for SpyUsers {
        fn backend(&self) -> &'static str {
            self.inner.backend()
        }

        async fn create(&self, ctx: &RequestContext, user: User) -> UserRepositoryResult<User> {
            self.inner.create(ctx, user).await
        }

        async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> UserRepositoryResult<User> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_id(ctx, id).await
        }

        async fn find_all(&self, ctx: &RequestContext) -> UserRepositoryResult<Vec<User>> {
            self.inner.find_all(ctx).await
        }
    }

    struct TestApp {
        router: Router,
        reads: Arc<AtomicUsize>,
        _exporter: InMemorySpanExporter,
        _provider: SdkTracerProvider,
    }

    fn test_app() -> TestApp {
        let reads = Arc::new(AtomicUsize::new(0));
        let users = SpyUsers {
            inner: MemoryUserRepository::new(),
            reads: Arc::clone(&reads),
        };
        let locator = RepositoryLocator::new(
            Arc::new(users),
            Arc::new(MemoryCacheRepository::new()),
        );

        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let state = AppState::new(
            Arc::new(locator),
            Some(provider.tracer("user-api-test")),
            CorsPolicy::default(),
        );

        TestApp {
            router: build_router(state),
            reads,
            _exporter: exporter,
            _provider: provider,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn get(router: &Router, uri: &str) -> Response {
        send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_user(router: &Router, name: &str, email: &str) -> Response {
        let body = json!({ "name": name, "email": email }).to_string();
        send(
            router,
            Request::builder()
                .method(Method::POST)
                .uri("/api/users")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_read_from_cache() {
        let app = test_app();

        let response = post_user(&app.router, "Alice", "alice@example.com").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "User created successfully");
        assert_eq!(body["data"]["id"], 1);
        assert_eq!(body["data"]["name"], "Alice");

        for _ in 0..2 {
            let response = get(&app.router, "/api/users/1").await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["data"]["email"], "alice@example.com");
        }

        // creation populated the cache, so neither read reached the store
        assert_eq!(app.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found_without_alert() {
        let app = test_app();

        let response = get(&app.router, "/api/users/999999").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
        let trace_id = response
            .headers()
            .get("X-Trace-Id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let problem = json_body(response).await;
        assert_eq!(problem["status"], 404);
        assert_eq!(problem["notify"], false);
        assert_eq!(problem["user.id"], 999999);
        assert_eq!(problem["detail"], "User with ID 999999 not found");
        assert_eq!(problem["instance"], "/api/users/999999");
        assert_eq!(problem["trace_id"], trace_id.as_str());
        assert!(
            problem["type"]
                .as_str()
                .unwrap()
                .ends_with("/errors/not-found")
        );
        assert_eq!(app.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_and_duplicates() {
        let app = test_app();

        let response = post_user(&app.router, "Bob", "not-an-email").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let problem = json_body(response).await;
        assert_eq!(problem["validation.field"], "email");
        assert_eq!(problem["notify"], false);

        let response = post_user(&app.router, "   ", "bob@example.com").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["validation.field"], "name");

        assert_eq!(
            post_user(&app.router, "Bob", "bob@example.com").await.status(),
            StatusCode::CREATED
        );
        let response = post_user(&app.router, "Bobby", "bob@example.com").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let problem = json_body(response).await;
        assert_eq!(problem["notify"], false);
        assert_eq!(problem["user.email"], "bob@example.com");

        let response = get(&app.router, "/api/users/abc").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["provided_id"], "abc");
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let app = test_app();
        for (name, email) in [
            ("Ann", "ann@example.com"),
            ("Ben", "ben@example.com"),
            ("Cat", "cat@example.com"),
        ] {
            assert_eq!(
                post_user(&app.router, name, email).await.status(),
                StatusCode::CREATED
            );
        }

        let response = get(&app.router, "/api/users").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let names: Vec<_> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|user| user["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Cat", "Ben", "Ann"]);
    }

    #[tokio::test]
    async fn test_every_response_carries_request_headers() {
        let app = test_app();
        let response = get(&app.router, "/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers.get("X-Trace-Id").unwrap().len(), 32);
        assert_eq!(headers.get("X-Span-Id").unwrap().len(), 16);
        let request_id = headers.get("X-Request-ID").unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());
        assert_eq!(
            json_body(response).await,
            json!({"success": true, "message": "Service is healthy"})
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_skips_handler() {
        let app = test_app();
        let response = send(
            &app.router,
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/users")
                .header(header::ORIGIN, "https://ui.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert!(
            response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS)
        );
    }
}
