//! End-to-end tests driving the state machine through the in-process
//! adapter.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value as Json};

use webmach::adapter::DirectClient;
use webmach::app::Application;
use webmach::dependency::{DepValue, DependencyError, Scope, StateSlot};
use webmach::request::{Method, Request};
use webmach::response::Response;
use webmach::validation::{checks, ValidationError};

fn body_json(response: &Response) -> Json {
    serde_json::from_slice(response.body.as_ref().expect("response has a body"))
        .expect("body is JSON")
}

#[test]
fn simple_get_json() {
    let mut app = Application::new();
    app.get("/hello", "hello", &[], |_| {
        Ok(DepValue::Json(json!({"message": "Hello"})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.execute(
        Request::new(Method::GET, "/hello").with_header("Accept", "application/json"),
    );
    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers.get("content-type"), Some("application/json"));
    assert_eq!(response.headers.get("content-length"), Some("19"));
    assert_eq!(body_json(&response), json!({"message": "Hello"}));
}

#[test]
fn missing_route_is_404_wrong_method_is_405_with_allow() {
    let mut app = Application::new();
    app.get("/x", "get_x", &[], |_| Ok(DepValue::Json(json!("get"))));
    app.post("/x", "post_x", &[], |_| Ok(DepValue::Json(json!("post"))));
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.get("/nowhere");
    assert_eq!(response.status_code, 404);
    assert_eq!(body_json(&response)["error"], "Not Found");

    let response = client.delete("/x");
    assert_eq!(response.status_code, 405);
    let allow = response.headers.get("allow").unwrap();
    assert!(allow.contains("GET"));
    assert!(allow.contains("POST"));
    assert!(!allow.contains("DELETE"));
}

#[test]
fn options_without_route_answers_from_registry() {
    let mut app = Application::new();
    app.get("/x", "get_x", &[], |_| Ok(DepValue::None));
    app.post("/x", "post_x", &[], |_| Ok(DepValue::None));
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.options("/x");
    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers.get("allow"), Some("GET, HEAD, POST, OPTIONS"));

    assert_eq!(client.options("/nowhere").status_code, 404);
}

#[test]
fn route_not_found_handler_overrides_default_404() {
    let mut app = Application::new();
    app.route_not_found("custom_miss", &["request"], |deps| {
        let request = deps.request("request")?;
        Ok(DepValue::from(Response::json(
            404,
            &json!({"missing": request.path}),
        )))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.get("/ghost");
    assert_eq!(response.status_code, 404);
    assert_eq!(body_json(&response), json!({"missing": "/ghost"}));
}

#[test]
fn path_params_are_captured_and_injected() {
    let mut app = Application::new();
    app.get("/users/{id}", "get_user", &["path_params"], |deps| {
        Ok(DepValue::Json(json!({"id": deps.json("path_params")?["id"]})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    assert_eq!(body_json(&client.get("/users/42")), json!({"id": "42"}));
}

#[test]
fn conditional_get_with_matching_etag() {
    let mut app = Application::new();
    app.etag("doc_version", &[], |_| Ok(DepValue::Text("v1".to_string())));
    app.get("/doc/1", "get_doc", &["doc_version"], |_| {
        Ok(DepValue::Json(json!({"id": 1})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let first = client.get("/doc/1");
    assert_eq!(first.status_code, 200);
    assert_eq!(first.headers.get("etag"), Some("\"v1\""));

    let second = client.execute(
        Request::new(Method::GET, "/doc/1").with_header("If-None-Match", "\"v1\""),
    );
    assert_eq!(second.status_code, 304);
    assert!(second.body.is_none());
    assert_eq!(second.headers.get("etag"), Some("\"v1\""));

    // A different validator still gets the representation.
    let third = client.execute(
        Request::new(Method::GET, "/doc/1").with_header("If-None-Match", "\"v0\""),
    );
    assert_eq!(third.status_code, 200);
}

#[test]
fn conditional_put_with_wrong_etag_never_runs_handler() {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();

    let mut app = Application::new();
    app.etag("doc_version", &[], |_| Ok(DepValue::Text("v2".to_string())));
    app.put("/doc/1", "put_doc", &["doc_version", "json_body"], move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(DepValue::Json(json!({"saved": true})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.execute(
        Request::new(Method::PUT, "/doc/1")
            .with_header("If-Match", "\"v1\"")
            .with_json(&json!({"title": "new"})),
    );
    assert_eq!(response.status_code, 412);
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    let response = client.execute(
        Request::new(Method::PUT, "/doc/1")
            .with_header("If-Match", "\"v2\"")
            .with_json(&json!({"title": "new"})),
    );
    assert_eq!(response.status_code, 200);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[test]
fn if_match_star_on_missing_resource_fails() {
    let mut app = Application::new();
    app.resource_exists("doc", &[], |_| Ok(DepValue::None));
    app.put("/doc/9", "put_doc", &["doc"], |_| {
        Ok(DepValue::Json(json!({"saved": true})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.execute(
        Request::new(Method::PUT, "/doc/9").with_header("If-Match", "*"),
    );
    assert_eq!(response.status_code, 412);
}

#[test]
fn if_none_match_star_on_existing_resource() {
    let mut app = Application::new();
    app.resource_exists("doc", &[], |_| Ok(DepValue::Json(json!({"id": 1}))));
    app.etag("doc_version", &[], |_| Ok(DepValue::Text("v1".to_string())));
    app.get("/doc/1", "get_doc", &["doc", "doc_version"], |deps| {
        Ok(deps.get("doc").clone())
    });
    app.put("/doc/1", "put_doc", &["doc", "doc_version"], |_| {
        Ok(DepValue::Json(json!({"saved": true})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let get = client.execute(
        Request::new(Method::GET, "/doc/1").with_header("If-None-Match", "*"),
    );
    assert_eq!(get.status_code, 304);

    let put = client.execute(
        Request::new(Method::PUT, "/doc/1").with_header("If-None-Match", "*"),
    );
    assert_eq!(put.status_code, 412);
}

#[test]
fn last_modified_conditionals() {
    let mut app = Application::new();
    app.last_modified("doc_mtime", &[], |_| {
        let t = webmach::request::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        Ok(DepValue::Time(t))
    });
    app.get("/doc", "get_doc", &["doc_mtime"], |_| {
        Ok(DepValue::Json(json!({"id": 1})))
    });
    app.put("/doc", "put_doc", &["doc_mtime"], |_| {
        Ok(DepValue::Json(json!({"saved": true})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let fresh = client.get("/doc");
    assert_eq!(fresh.status_code, 200);
    assert_eq!(
        fresh.headers.get("last-modified"),
        Some("Mon, 01 Jan 2024 00:00:00 GMT")
    );

    let unchanged = client.execute(
        Request::new(Method::GET, "/doc")
            .with_header("If-Modified-Since", "Tue, 02 Jan 2024 00:00:00 GMT"),
    );
    assert_eq!(unchanged.status_code, 304);

    let changed = client.execute(
        Request::new(Method::GET, "/doc")
            .with_header("If-Modified-Since", "Sun, 31 Dec 2023 00:00:00 GMT"),
    );
    assert_eq!(changed.status_code, 200);

    let stale_write = client.execute(
        Request::new(Method::PUT, "/doc")
            .with_header("If-Unmodified-Since", "Sun, 31 Dec 2023 00:00:00 GMT"),
    );
    assert_eq!(stale_write.status_code, 412);

    let ok_write = client.execute(
        Request::new(Method::PUT, "/doc")
            .with_header("If-Unmodified-Since", "Tue, 02 Jan 2024 00:00:00 GMT"),
    );
    assert_eq!(ok_write.status_code, 200);
}

#[test]
fn validation_failure_reports_each_field() {
    let mut app = Application::new();
    app.validator("create_user", &["json_body"], |deps| {
        let body = deps.json("json_body")?;
        let mut details = vec![];
        let mut user = serde_json::Map::new();
        match checks::non_empty_string(body, "name") {
            Ok(name) => {
                user.insert("name".to_string(), Json::String(name));
            }
            Err(issue) => details.push(issue),
        }
        match checks::email(body, "email") {
            Ok(email) => {
                user.insert("email".to_string(), Json::String(email));
            }
            Err(issue) => details.push(issue),
        }
        match checks::int_in_range(body, "age", 0, 150) {
            Ok(age) => {
                user.insert("age".to_string(), Json::from(age));
            }
            Err(issue) => details.push(issue),
        }
        if details.is_empty() {
            Ok(DepValue::Json(Json::Object(user)))
        } else {
            Err(ValidationError::failed(details).into())
        }
    });
    app.post("/users", "create", &["create_user"], |deps| {
        Ok(deps.get("create_user").clone())
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.post_json("/users", &json!({"name": "", "email": "x", "age": -1}));
    assert_eq!(response.status_code, 422);
    let body = body_json(&response);
    assert_eq!(body["error"], "Validation failed");
    let locs: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["loc"][0].as_str().unwrap())
        .collect();
    assert_eq!(locs, vec!["name", "email", "age"]);

    let response = client.post_json(
        "/users",
        &json!({"name": "Ada", "email": "ada@lovelace.dev", "age": 36}),
    );
    assert_eq!(response.status_code, 200);
    assert_eq!(body_json(&response)["name"], "Ada");
}

#[test]
fn content_negotiation_highest_quality_wins() {
    let mut app = Application::new();
    app.get("/data", "data", &[], |_| {
        Ok(DepValue::Json(json!({"n": 1})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.execute(
        Request::new(Method::GET, "/data")
            .with_header("Accept", "text/html;q=0.9, application/json;q=1.0"),
    );
    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers.get("content-type"), Some("application/json"));

    let response = client.execute(
        Request::new(Method::GET, "/data")
            .with_header("Accept", "text/html;q=1.0, application/json;q=0.5"),
    );
    assert_eq!(
        response.headers.get("content-type"),
        Some("text/html; charset=utf-8")
    );
}

#[test]
fn wildcard_and_missing_accept_pick_first_renderer() {
    let mut app = Application::new();
    app.get("/data", "data", &[], |_| Ok(DepValue::Json(json!([1, 2]))));
    let client = DirectClient::new(app.freeze().unwrap());

    let wildcard = client.execute(Request::new(Method::GET, "/data").with_header("Accept", "*/*"));
    assert_eq!(wildcard.headers.get("content-type"), Some("application/json"));

    let missing = client.get("/data");
    assert_eq!(missing.headers.get("content-type"), Some("application/json"));
}

#[test]
fn partial_wildcard_accept_is_not_acceptable() {
    let mut app = Application::new();
    app.get("/data", "data", &[], |_| Ok(DepValue::Json(json!(1))));
    let client = DirectClient::new(app.freeze().unwrap());

    let response =
        client.execute(Request::new(Method::GET, "/data").with_header("Accept", "text/*"));
    assert_eq!(response.status_code, 406);
    let error = body_json(&response)["error"].as_str().unwrap().to_string();
    assert!(error.contains("application/json"));
    assert!(error.contains("text/plain"));
}

#[test]
fn route_local_renderer_receives_handler_result() {
    let mut app = Application::new();
    app.get("/report", "report", &[], |_| {
        Ok(DepValue::Json(json!({"count": 3})))
    });
    app.route_renderer("report", "text/html", Some("utf-8"), &["report"], |deps| {
        let report = deps.json("report")?;
        Ok(DepValue::Text(format!("<b>{}</b>", report["count"])))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response =
        client.execute(Request::new(Method::GET, "/report").with_header("Accept", "text/html"));
    assert_eq!(response.status_code, 200);
    assert_eq!(
        response.headers.get("content-type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(response.body.as_deref(), Some(&b"<b>3</b>"[..]));

    // JSON clients bypass the route renderer.
    let response = client.execute(
        Request::new(Method::GET, "/report").with_header("Accept", "application/json"),
    );
    assert_eq!(body_json(&response), json!({"count": 3}));
}

#[test]
fn request_scope_memoizes_within_a_request() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut app = Application::new();
    app.dependency("counter", Scope::Request, &[], move |_| {
        Ok(DepValue::Int(counter.fetch_add(1, Ordering::SeqCst) as i64 + 1))
    });
    app.dependency("via_a", Scope::Request, &["counter"], |deps| {
        Ok(deps.get("counter").clone())
    });
    app.dependency("via_b", Scope::Request, &["counter"], |deps| {
        Ok(deps.get("counter").clone())
    });
    app.get(
        "/count",
        "count",
        &["counter", "via_a", "via_b"],
        |deps| Ok(deps.get("counter").clone()),
    );
    let client = DirectClient::new(app.freeze().unwrap());

    let first = client.get("/count");
    assert_eq!(body_json(&first), json!(1));
    let second = client.get("/count");
    assert_eq!(body_json(&second), json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn session_scope_memoizes_across_requests() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut app = Application::new();
    app.dependency("shared", Scope::Session, &[], move |_| {
        Ok(DepValue::Int(counter.fetch_add(1, Ordering::SeqCst) as i64 + 1))
    });
    app.get("/count", "count", &["shared"], |deps| {
        Ok(deps.get("shared").clone())
    });
    let client = DirectClient::new(app.freeze().unwrap());

    assert_eq!(body_json(&client.get("/count")), json!(1));
    assert_eq!(body_json(&client.get("/count")), json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn authorized_and_forbidden_callbacks() {
    let mut app = Application::new();
    app.authorized("token_ok", &["request_headers"], |deps| {
        let headers = deps.headers("request_headers")?;
        let headers = headers.lock().unwrap();
        Ok(DepValue::Bool(headers.get("authorization") == Some("Bearer valid")))
    });
    app.forbidden("admin_area", &["request_headers"], |deps| {
        let headers = deps.headers("request_headers")?;
        let headers = headers.lock().unwrap();
        Ok(match headers.get("x-role") {
            Some("admin") => DepValue::Json(json!({"role": "admin"})),
            _ => DepValue::None,
        })
    });
    app.get("/admin", "admin", &["token_ok", "admin_area"], |deps| {
        Ok(deps.get("admin_area").clone())
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let anonymous = client.get("/admin");
    assert_eq!(anonymous.status_code, 401);

    let wrong_role = client.execute(
        Request::new(Method::GET, "/admin").with_header("Authorization", "Bearer valid"),
    );
    assert_eq!(wrong_role.status_code, 403);

    let admin = client.execute(
        Request::new(Method::GET, "/admin")
            .with_header("Authorization", "Bearer valid")
            .with_header("X-Role", "admin"),
    );
    assert_eq!(admin.status_code, 200);
    assert_eq!(body_json(&admin), json!({"role": "admin"}));
    // Authorization was consulted, so caches must vary on it.
    assert!(admin.headers.get_all("vary").contains(&"Authorization"));
}

#[test]
fn resource_exists_404_and_post_create() {
    let mut app = Application::new();
    app.resource_exists("item", &["path_params"], |deps| {
        let params = deps.json("path_params")?;
        Ok(match params["id"].as_str() {
            Some("1") => DepValue::Json(json!({"id": 1})),
            _ => DepValue::None,
        })
    });
    app.get("/items/{id}", "get_item", &["item"], |deps| {
        Ok(deps.get("item").clone())
    });
    app.post("/items/{id}", "post_item", &["item"], |deps| {
        Ok(match deps.get("item") {
            DepValue::None => DepValue::from(Response::json(201, &json!({"created": true}))),
            existing => existing.clone(),
        })
    });
    let client = DirectClient::new(app.freeze().unwrap());

    assert_eq!(client.get("/items/1").status_code, 200);
    assert_eq!(client.get("/items/9").status_code, 404);

    // POST may create a missing resource instead of 404ing.
    let created = client.execute(Request::new(Method::POST, "/items/9"));
    assert_eq!(created.status_code, 201);
}

#[test]
fn uri_length_boundary() {
    let mut app = Application::new();
    app.get("/{rest}", "any", &[], |_| Ok(DepValue::Json(json!("ok"))));
    let client = DirectClient::new(app.freeze().unwrap());

    let at_limit = format!("/{}", "a".repeat(2047));
    assert_eq!(at_limit.len(), 2048);
    assert_eq!(client.get(&at_limit).status_code, 200);

    let over_limit = format!("/{}", "a".repeat(2048));
    assert_eq!(client.get(&over_limit).status_code, 414);
}

#[test]
fn unsupported_media_type_and_parse_errors() {
    let mut app = Application::new();
    app.post("/ingest", "ingest", &["json_body"], |deps| {
        Ok(deps.get("json_body").clone())
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let wrong_type = client.execute(
        Request::new(Method::POST, "/ingest")
            .with_header("Content-Type", "application/xml")
            .with_body(b"<x/>".to_vec()),
    );
    assert_eq!(wrong_type.status_code, 415);

    let bad_json = client.execute(
        Request::new(Method::POST, "/ingest")
            .with_header("Content-Type", "application/json")
            .with_body(b"{not json".to_vec()),
    );
    assert_eq!(bad_json.status_code, 422);

    let bad_utf8 = client.execute(
        Request::new(Method::POST, "/ingest")
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(vec![b'"', 0xff, b'"']),
    );
    assert_eq!(bad_utf8.status_code, 422);
}

#[test]
fn form_and_text_bodies() {
    let mut app = Application::new();
    app.post("/form", "form", &["form_body"], |deps| {
        match deps.get("form_body") {
            DepValue::Form(entries) => {
                let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
                Ok(DepValue::Json(json!({ "fields": names })))
            }
            other => Ok(other.clone()),
        }
    });
    app.post("/text", "text", &["text_body"], |deps| {
        Ok(DepValue::Json(json!({"len": deps.text("text_body")?.len()})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.execute(
        Request::new(Method::POST, "/form")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(b"a=1&b=2".to_vec()),
    );
    assert_eq!(body_json(&response), json!({"fields": ["a", "b"]}));

    let response = client.execute(
        Request::new(Method::POST, "/text")
            .with_header("Content-Type", "text/plain")
            .with_body(b"hello".to_vec()),
    );
    assert_eq!(body_json(&response), json!({"len": 5}));
}

#[test]
fn unresolved_dependency_is_500_with_error_body() {
    let mut app = Application::new();
    app.get("/broken", "broken", &["no_such_thing"], |deps| {
        Ok(deps.get("no_such_thing").clone())
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.get("/broken");
    assert_eq!(response.status_code, 500);
    let body = body_json(&response);
    assert_eq!(body["error"], "Unresolved dependency: no_such_thing");
    assert!(body["request_id"].is_string());
}

#[test]
fn cyclic_dependency_is_500() {
    let mut app = Application::new();
    app.dependency("a", Scope::Request, &["b"], |deps| Ok(deps.get("b").clone()));
    app.dependency("b", Scope::Request, &["a"], |deps| Ok(deps.get("a").clone()));
    app.get("/loop", "looped", &["a"], |deps| Ok(deps.get("a").clone()));
    let client = DirectClient::new(app.freeze().unwrap());

    assert_eq!(client.get("/loop").status_code, 500);
}

#[test]
fn handler_error_records_exception_for_error_handlers() {
    let mut app = Application::new();
    app.get("/explode", "explode", &[], |_| {
        Err(DependencyError::provider("kaboom"))
    });
    app.error_handler(500, None, &["exception"], |deps| {
        Ok(DepValue::Json(json!({"caught": deps.text("exception")?})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.get("/explode");
    assert_eq!(response.status_code, 500);
    assert_eq!(
        body_json(&response),
        json!({"caught": "provider failed: kaboom"})
    );
}

#[test]
fn handler_returning_none_is_204_without_length() {
    let mut app = Application::new();
    app.delete("/things/{id}", "delete_thing", &[], |_| Ok(DepValue::None));
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.delete("/things/5");
    assert_eq!(response.status_code, 204);
    assert!(response.body.is_none());
    assert!(response.headers.get("content-length").is_none());
}

#[test]
fn head_matches_get_headers_without_body() {
    let mut app = Application::new();
    app.etag("v", &[], |_| Ok(DepValue::Text("7".to_string())));
    app.get("/page", "page", &["v"], |_| {
        Ok(DepValue::Json(json!({"message": "Hello"})))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let get = client.get("/page");
    let head = client.head("/page");
    assert_eq!(head.status_code, get.status_code);
    assert!(head.body.is_none());
    assert_eq!(head.headers.get("content-length"), get.headers.get("content-length"));
    assert_eq!(head.headers.get("content-type"), get.headers.get("content-type"));
    assert_eq!(head.headers.get("etag"), get.headers.get("etag"));
}

#[test]
fn vary_accept_only_for_real_negotiation() {
    let mut app = Application::new();
    app.get("/data", "data", &[], |_| Ok(DepValue::Json(json!(1))));
    let client = DirectClient::new(app.freeze().unwrap());

    let negotiated = client.execute(
        Request::new(Method::GET, "/data").with_header("Accept", "application/json"),
    );
    assert!(negotiated.headers.get_all("vary").contains(&"Accept"));

    let wildcard =
        client.execute(Request::new(Method::GET, "/data").with_header("Accept", "*/*"));
    assert!(!wildcard.headers.get_all("vary").contains(&"Accept"));
}

#[test]
fn default_headers_and_id_hooks_apply_everywhere() {
    let mut app = Application::new();
    app.default_headers(|_, response| {
        response.headers.set("X-Content-Type-Options", "nosniff");
    });
    app.request_id_hook(|request| format!("req-{}", request.path.len()));
    app.get("/ok", "ok", &[], |_| Ok(DepValue::Json(json!("ok"))));
    let client = DirectClient::new(app.freeze().unwrap());

    let ok = client.get("/ok");
    assert_eq!(ok.headers.get("x-content-type-options"), Some("nosniff"));
    assert_eq!(ok.headers.get("x-request-id"), Some("req-3"));

    // Error responses get the same treatment, and the body id matches the
    // header id.
    let missing = client.get("/gone");
    assert_eq!(missing.status_code, 404);
    assert_eq!(missing.headers.get("x-content-type-options"), Some("nosniff"));
    assert_eq!(
        body_json(&missing)["request_id"].as_str(),
        missing.headers.get("x-request-id")
    );
}

#[test]
fn response_headers_dependency_reaches_the_response() {
    let mut app = Application::new();
    app.validator("stamped", &["response_headers"], |deps| {
        let headers = deps.headers("response_headers")?;
        headers.lock().unwrap().set("X-Validated", "yes");
        Ok(DepValue::Bool(true))
    });
    app.get("/stamped", "stamped_route", &["stamped"], |_| {
        Ok(DepValue::Json(json!("ok")))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.get("/stamped");
    assert_eq!(response.headers.get("x-validated"), Some("yes"));
}

#[test]
fn service_available_default_callback() {
    let mut app = Application::new();
    app.default_callback(StateSlot::ServiceAvailable, "maintenance_gate", &[], |_| {
        Ok(DepValue::Bool(false))
    });
    app.get("/anything", "anything", &[], |_| Ok(DepValue::Json(json!(1))));
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.get("/anything");
    assert_eq!(response.status_code, 503);
    assert_eq!(body_json(&response)["error"], "Service Unavailable");
}

#[test]
fn custom_parser_and_renderer_participate_in_negotiation() {
    use webmach::content::{ParseError, Parser, RawBody, RenderError, Renderer};

    struct CsvParser;
    impl Parser for CsvParser {
        fn media_type(&self) -> &str {
            "text/csv"
        }
        fn dependency_name(&self) -> &str {
            "csv_body"
        }
        fn parse(&self, body: &RawBody) -> Result<DepValue, ParseError> {
            let rows: Vec<Json> = body
                .text()?
                .lines()
                .map(|line| json!(line.split(',').collect::<Vec<_>>()))
                .collect();
            Ok(DepValue::Json(json!(rows)))
        }
    }

    struct CsvRenderer;
    impl Renderer for CsvRenderer {
        fn media_type(&self) -> &str {
            "text/csv"
        }
        fn render(&self, value: &DepValue, _: &Request) -> Result<Vec<u8>, RenderError> {
            let rows = value
                .as_json()
                .and_then(Json::as_array)
                .ok_or_else(|| RenderError::new("text/csv", "expected an array of rows"))?;
            let lines: Vec<String> = rows
                .iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| c.as_str().unwrap_or_default().to_string())
                                .collect::<Vec<_>>()
                                .join(",")
                        })
                        .unwrap_or_default()
                })
                .collect();
            Ok(lines.join("\n").into_bytes())
        }
    }

    let mut app = Application::new();
    app.parser(CsvParser);
    app.renderer(CsvRenderer);
    app.post("/table", "table", &["csv_body"], |deps| {
        Ok(deps.get("csv_body").clone())
    });
    let client = DirectClient::new(app.freeze().unwrap());

    let response = client.execute(
        Request::new(Method::POST, "/table")
            .with_header("Content-Type", "text/csv")
            .with_header("Accept", "text/csv")
            .with_body(b"a,b\nc,d".to_vec()),
    );
    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers.get("content-type"), Some("text/csv"));
    assert_eq!(response.body.as_deref(), Some(&b"a,b\nc,d"[..]));

    // The vendor parser refuses other media types.
    let mismatched = client.execute(
        Request::new(Method::POST, "/table")
            .with_header("Content-Type", "application/json")
            .with_body(b"[]".to_vec()),
    );
    assert_eq!(mismatched.status_code, 415);
}

#[test]
fn malformed_request_callback_short_circuits() {
    let mut app = Application::new();
    app.state_callback(
        StateSlot::MalformedRequest,
        "reject_query",
        &["query_params"],
        |deps| {
            let query = deps.json("query_params")?;
            Ok(DepValue::Bool(query.get("bad").is_some()))
        },
    );
    app.get("/check", "check", &["reject_query"], |_| {
        Ok(DepValue::Json(json!("fine")))
    });
    let client = DirectClient::new(app.freeze().unwrap());

    assert_eq!(client.get("/check").status_code, 200);
    let bad = client.execute(
        Request::new(Method::GET, "/check").with_query_param("bad", "1"),
    );
    assert_eq!(bad.status_code, 400);
}
