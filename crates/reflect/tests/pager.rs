#![forbid(unsafe_code)]

use remora_core::{ListMeta, ObjectList, ResourceKind};
use remora_reflect::mock::{ListScript, MockError, MockListWatcher};
use remora_reflect::ListPager;
use serde_json::json;

fn lw() -> MockListWatcher {
    MockListWatcher::new(ResourceKind::namespaced("", "v1", "ConfigMap"))
}

fn page(rv: &str, continue_token: Option<&str>, uids: &[&str]) -> ObjectList {
    ObjectList {
        metadata: ListMeta {
            resource_version: Some(rv.to_string()),
            continue_token: continue_token.map(str::to_string),
        },
        items: uids
            .iter()
            .map(|uid| json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"uid": uid}}))
            .collect(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follows_continue_tokens_and_reports_pagination() {
    let lw = lw();
    lw.queue_list(ListScript::Ok(page("100", Some("t1"), &["a", "b"])));
    lw.queue_list(ListScript::Ok(page("ignored", Some("t2"), &["c"])));
    lw.queue_list(ListScript::Ok(page("ignored", None, &["d"])));

    let got = ListPager::new(&lw).page_size(2).list("0").await.unwrap();
    assert_eq!(got.resource_version, "100");
    assert!(got.paginated);
    assert_eq!(got.items.len(), 4);

    let calls = lw.list_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].resource_version.as_deref(), Some("0"));
    assert_eq!(calls[0].limit, Some(2));
    assert_eq!(calls[0].continue_token, None);
    // Later pages ride the continuation, not the resource version.
    assert_eq!(calls[1].resource_version, None);
    assert_eq!(calls[1].continue_token.as_deref(), Some("t1"));
    assert_eq!(calls[2].continue_token.as_deref(), Some("t2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_page_is_not_paginated() {
    let lw = lw();
    lw.queue_list(ListScript::Ok(page("7", None, &["a"])));
    let got = ListPager::new(&lw).list("").await.unwrap();
    assert!(!got.paginated);
    assert_eq!(got.resource_version, "7");
    // An empty relist RV is omitted on the wire.
    assert_eq!(lw.list_calls()[0].resource_version, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_page_size_requests_one_unpaged_list() {
    let lw = lw();
    lw.queue_list(ListScript::Ok(page("42", None, &["a", "b"])));
    let got = ListPager::new(&lw).page_size(0).list("41").await.unwrap();
    assert!(!got.paginated);
    assert_eq!(got.items.len(), 2);

    let calls = lw.list_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].limit, None);
    assert_eq!(calls[0].resource_version.as_deref(), Some("41"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_continuation_falls_back_to_full_list() {
    let lw = lw();
    lw.queue_list(ListScript::Ok(page("100", Some("t1"), &["a"])));
    lw.queue_list(ListScript::Err(MockError::Expired));
    lw.queue_list(ListScript::Ok(page("200", None, &["x", "y", "z"])));

    let got = ListPager::new(&lw).page_size(1).list("0").await.unwrap();
    // The partial first page is discarded with the expired continuation.
    assert_eq!(got.resource_version, "200");
    assert!(!got.paginated);
    assert_eq!(got.items.len(), 3);

    let calls = lw.list_calls();
    assert_eq!(calls.len(), 3);
    // Fallback: no paging, no resource version.
    assert_eq!(calls[2].limit, None);
    assert_eq!(calls[2].resource_version, None);
    assert_eq!(calls[2].continue_token, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_first_page_is_not_a_fallback_case() {
    let lw = lw();
    lw.queue_list(ListScript::Err(MockError::Expired));
    let err = ListPager::new(&lw).page_size(1).list("99").await.unwrap_err();
    assert!(matches!(err, MockError::Expired));
    assert_eq!(lw.list_calls().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_expired_page_errors_propagate() {
    let lw = lw();
    lw.queue_list(ListScript::Ok(page("100", Some("t1"), &["a"])));
    lw.queue_list(ListScript::Err(MockError::Other("boom".into())));
    let err = ListPager::new(&lw).page_size(1).list("0").await.unwrap_err();
    assert!(matches!(err, MockError::Other(_)));
    assert_eq!(lw.list_calls().len(), 2);
}
