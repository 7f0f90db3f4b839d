//! Integration tests for `/metrics` request handling.

use strata_metrics::{MetricsBuilder, MetricsRequest, MetricsRequestHandler, SharedMetricRegistries};

fn handler_with_data() -> MetricsRequestHandler {
    let registries = SharedMetricRegistries::new();
    registries.application().counter("orders").unwrap().inc_by(3);
    registries.vendor().counter("orders").unwrap().inc();
    registries.vendor().histogram("payload").unwrap().update(512);
    registries.get_or_create("empty");
    MetricsRequestHandler::new(registries)
}

#[test]
fn test_all_scopes() {
    let response = handler_with_data().handle(&MetricsRequest::get("/metrics"));
    assert_eq!(response.status, 200);
    assert!(response.body.contains("orders_total{scope=\"application\"} 3"), "{}", response.body);
    assert!(response.body.contains("orders_total{scope=\"vendor\"} 1"), "{}", response.body);
    assert_eq!(
        response.header("Access-Control-Allow-Methods"),
        Some("GET, POST, PUT, DELETE, OPTIONS, HEAD")
    );
    assert_eq!(response.header("Access-Control-Allow-Credentials"), Some("true"));
}

#[test]
fn test_one_scope() {
    let handler = handler_with_data();
    let response = handler.handle(&MetricsRequest::get("/metrics").param("scope", "vendor"));
    assert_eq!(response.status, 200);
    assert!(response.body.contains("payload"));
    assert!(!response.body.contains("scope=\"application\""));
}

#[test]
fn test_first_scope_wins() {
    let handler = handler_with_data();
    let response = handler.handle(
        &MetricsRequest::get("/metrics")
            .param("scope", "application")
            .param("scope", "vendor"),
    );
    assert_eq!(response.status, 200);
    assert!(response.body.contains("scope=\"application\""));
    assert!(!response.body.contains("scope=\"vendor\""));
}

#[test]
fn test_scope_not_found_vs_empty() {
    let handler = handler_with_data();

    let response = handler.handle(&MetricsRequest::get("/metrics").param("scope", "nope"));
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "Scope nope not found");

    let response = handler.handle(&MetricsRequest::get("/metrics").param("scope", "empty"));
    assert_eq!(response.status, 204);
    assert_eq!(response.body, "No data in scope empty");
}

#[test]
fn test_metric_in_scope() {
    let handler = handler_with_data();

    let response = handler.handle(
        &MetricsRequest::get("/metrics")
            .param("scope", "application")
            .param("name", "orders"),
    );
    assert_eq!(response.status, 200);
    assert!(response.body.contains("orders_total{scope=\"application\"} 3"));

    let response = handler.handle(
        &MetricsRequest::get("/metrics")
            .param("scope", "application")
            .param("name", "payload"),
    );
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "Metric payload not found in scope application");
}

#[test]
fn test_metric_across_scopes() {
    let handler = handler_with_data();

    let response = handler.handle(&MetricsRequest::get("/metrics").param("name", "orders"));
    assert_eq!(response.status, 200);
    assert!(response.body.contains("scope=\"application\""));
    assert!(response.body.contains("scope=\"vendor\""));

    let response = handler.handle(&MetricsRequest::get("/metrics").param("name", "ghost"));
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "Metric ghost not found in any scope");
}

#[test]
fn test_accept_negotiation() {
    let handler = handler_with_data();

    let response = handler.handle(&MetricsRequest::get("/metrics").accept("application/json"));
    assert_eq!(response.status, 406);

    let response = handler.handle(
        &MetricsRequest::get("/metrics").accept("application/json;q=0.9, text/plain;q=0.5"),
    );
    assert_eq!(response.status, 200);

    let response = handler.handle(&MetricsRequest::get("/metrics").accept("*/*"));
    assert_eq!(response.status, 200);
}

#[test]
fn test_unexpected_path() {
    let handler = handler_with_data();
    let response = handler.handle(&MetricsRequest::get("/metrics/application/orders"));
    assert_eq!(response.status, 404);
    assert!(response.body.starts_with("The expected requests are"));
}

#[test]
fn test_backend_disabled() {
    let registries = MetricsBuilder::new().prometheus_enabled(false).build().unwrap();
    registries.application().counter("c").unwrap().inc();
    let response = MetricsRequestHandler::new(registries).handle(&MetricsRequest::get("/metrics"));
    assert_eq!(response.status, 501);
    assert_eq!(response.body, "The /metrics endpoint is not supported.");
}

#[test]
fn test_method_checked_first() {
    let registries = MetricsBuilder::new().prometheus_enabled(false).build().unwrap();
    let response = MetricsRequestHandler::new(registries)
        .handle(&MetricsRequest::new("DELETE", "/elsewhere").accept("application/json"));
    assert_eq!(response.status, 405);
}
