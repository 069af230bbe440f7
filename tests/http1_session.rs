use std::time::Duration;

use serde_json::json;
use wraith::executor::{self, RequestOptions};
use wraith::{Cookie, Error, ErrorKind, HttpVersion, Session, SessionConfig};

mod helpers;
use helpers::mock_server::{response, MockHttpServer, RecordedRequest};

fn session(config: serde_json::Value) -> Session {
    let config: SessionConfig = serde_json::from_value(config).unwrap();
    Session::new("test", &config).unwrap()
}

fn redirect_chain(req: &RecordedRequest) -> Vec<u8> {
    // /hop/N redirects to /hop/N-1; /hop/0 answers
    let n: u32 = req
        .target
        .trim_start_matches("/hop/")
        .parse()
        .unwrap_or(0);
    if n == 0 {
        response(200, &[], b"landed")
    } else {
        let location = format!("/hop/{}", n - 1);
        response(302, &[("Location", &location)], b"")
    }
}

#[tokio::test]
async fn keep_alive_connection_is_reused() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|_| response(200, &[], b"Hello"));

    let mut s = session(json!({}));
    for _ in 0..3 {
        let out = executor::execute(&mut s, RequestOptions::new("GET", format!("{}/", url)))
            .await
            .unwrap();
        assert_eq!(out.response.status, 200);
        assert_eq!(out.response.http_version(), HttpVersion::Http1_1);
        assert_eq!(out.body.as_ref(), b"Hello");
    }
    assert_eq!(state.requests().len(), 3);
    assert_eq!(state.connection_count(), 1);
}

#[tokio::test]
async fn connection_close_forces_a_new_connection() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|_| response(200, &[("Connection", "close")], b"bye"));

    let mut s = session(json!({}));
    for _ in 0..2 {
        executor::execute(&mut s, RequestOptions::new("GET", &url))
            .await
            .unwrap();
    }
    assert_eq!(state.connection_count(), 2);
}

#[tokio::test]
async fn follows_exactly_n_redirects() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(redirect_chain);

    let mut s = session(json!({"followRedirects": true}));
    let out = executor::execute(&mut s, RequestOptions::new("GET", format!("{}/hop/4", url)))
        .await
        .unwrap();
    assert_eq!(out.response.status, 200);
    assert_eq!(out.body.as_ref(), b"landed");
    assert_eq!(out.response.url.path(), "/hop/0");
    assert_eq!(state.requests().len(), 5);
}

#[tokio::test]
async fn redirects_are_not_followed_by_default() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    server.start(redirect_chain);

    let mut s = session(json!({}));
    let out = executor::execute(&mut s, RequestOptions::new("GET", format!("{}/hop/2", url)))
        .await
        .unwrap();
    assert_eq!(out.response.status, 302);
    assert_eq!(out.response.location(), Some("/hop/1"));
}

#[tokio::test]
async fn too_many_redirects_is_an_error() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    server.start(redirect_chain);

    let mut s = session(json!({"followRedirects": true}));
    let err = executor::execute(&mut s, RequestOptions::new("GET", format!("{}/hop/11", url)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RedirectLimit { count: 10 }));
    assert_eq!(err.kind(), ErrorKind::Redirect);
}

#[tokio::test]
async fn redirect_cycle_is_a_loop_error() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    server.start(|req| {
        let next = if req.target == "/a" { "/b" } else { "/a" };
        response(302, &[("Location", next)], b"")
    });

    let mut s = session(json!({"followRedirects": true}));
    let err = executor::execute(&mut s, RequestOptions::new("GET", format!("{}/a", url)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RedirectLoop(_)), "{:?}", err);
}

#[tokio::test]
async fn see_other_turns_post_into_get_without_body() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|req| {
        if req.target == "/submit" {
            response(303, &[("Location", "/done")], b"")
        } else {
            response(200, &[], b"ok")
        }
    });

    let mut s = session(json!({"followRedirects": true}));
    let mut req = RequestOptions::new("POST", format!("{}/submit", url));
    req.json = Some(json!({"k": "v"}));
    executor::execute(&mut s, req).await.unwrap();

    let seen = state.requests();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].header("content-type"), Some("application/json"));
    assert_eq!(seen[0].body, br#"{"k":"v"}"#);
    assert_eq!(seen[1].method, "GET");
    assert_eq!(seen[1].target, "/done");
    assert!(seen[1].header("content-type").is_none());
    assert!(seen[1].body.is_empty());
}

#[tokio::test]
async fn set_cookie_is_sent_back_on_matching_requests_only() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|req| {
        if req.target == "/login" {
            response(
                200,
                &[("Set-Cookie", "sid=abc; Path=/app"), ("Set-Cookie", "theme=dark")],
                b"",
            )
        } else {
            response(200, &[], b"")
        }
    });

    let mut s = session(json!({}));
    let login = executor::execute(&mut s, RequestOptions::new("GET", format!("{}/login", url)))
        .await
        .unwrap();
    assert_eq!(login.cookies.len(), 2);

    executor::execute(&mut s, RequestOptions::new("GET", format!("{}/app/home", url)))
        .await
        .unwrap();
    executor::execute(&mut s, RequestOptions::new("GET", format!("{}/other", url)))
        .await
        .unwrap();

    let seen = state.requests();
    assert_eq!(seen[1].header("cookie"), Some("sid=abc; theme=dark"));
    assert_eq!(seen[2].header("cookie"), Some("theme=dark"));
}

#[tokio::test]
async fn request_cookies_do_not_stick_to_the_session() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|_| response(200, &[], b""));

    let mut s = session(json!({}));
    let mut req = RequestOptions::new("GET", &url);
    req.cookies = vec![Cookie::new("once", "1", "127.0.0.1")];
    executor::execute(&mut s, req).await.unwrap();
    executor::execute(&mut s, RequestOptions::new("GET", &url))
        .await
        .unwrap();

    let seen = state.requests();
    assert_eq!(seen[0].header("cookie"), Some("once=1"));
    assert_eq!(seen[1].header("cookie"), None);
    assert!(s.cookies().is_empty());
}

#[tokio::test]
async fn headers_keep_first_casing_and_requested_order() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|_| response(200, &[], b""));

    let mut s = session(json!({
        "headers": {"X-First": "1", "Accept": "text/html", "x-first": "2"},
        "headerOrder": ["accept", "x-first"],
    }));
    let mut req = RequestOptions::new("GET", &url);
    req.headers = vec![("X-Extra".into(), Some("e".into())), ("accept".into(), None)];
    req.query = vec![("q".into(), "a b".into())];
    executor::execute(&mut s, req).await.unwrap();

    let seen = &state.requests()[0];
    assert_eq!(seen.target, "/?q=a+b");
    assert_eq!(seen.header_names(), vec!["Host", "X-First", "X-Extra"]);
    assert_eq!(seen.header("x-first"), Some("2"));
}

#[tokio::test]
async fn form_body_gets_a_content_type_and_length() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let state = server.start(|_| response(200, &[], b""));

    let mut s = session(json!({}));
    let mut req = RequestOptions::new("put", &url);
    req.form = Some(vec![("a".into(), "1".into()), ("a".into(), "2".into())]);
    executor::execute(&mut s, req).await.unwrap();

    let seen = &state.requests()[0];
    assert_eq!(seen.method, "PUT");
    assert_eq!(seen.header("content-type"), Some("application/x-www-form-urlencoded"));
    assert_eq!(seen.header("content-length"), Some("7"));
    assert_eq!(seen.body, b"a=1&a=2");
}

#[tokio::test]
async fn error_statuses_are_ordinary_responses() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    server.start(|_| response(500, &[], b"boom"));

    let mut s = session(json!({}));
    let out = executor::execute(&mut s, RequestOptions::new("GET", &url))
        .await
        .unwrap();
    assert_eq!(out.response.status, 500);
    assert_eq!(out.body.as_ref(), b"boom");
}

#[tokio::test]
async fn slow_server_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        // Accept and never answer
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut s = session(json!({}));
    let mut req = RequestOptions::new("GET", url);
    req.timeout = Some(Duration::from_millis(200));
    let err = executor::execute(&mut s, req).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut s = session(json!({}));
    let err = executor::execute(
        &mut s,
        RequestOptions::new("GET", format!("http://127.0.0.1:{}/", port)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn head_with_content_encoding_returns_empty_body() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    // Headers describe the GET body, none follows
    let state = server.start(|_| {
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 31\r\n\r\n".to_vec()
    });

    let mut s = session(json!({}));
    let out = executor::execute(&mut s, RequestOptions::new("HEAD", format!("{}/", url)))
        .await
        .unwrap();
    assert_eq!(out.response.status, 200);
    assert_eq!(out.response.header("content-encoding"), Some("gzip"));
    assert!(out.body.is_empty());
    assert_eq!(state.requests()[0].method, "HEAD");
}
