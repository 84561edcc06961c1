use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::crdt::Element;
use crate::state::test_helpers;
use crate::storage::DurableStore;

fn content() -> RoomContent {
    RoomContent {
        elements: vec![Element::new("hero", "section", json!({"y": 0}))],
        settings: [("canvas_height".to_string(), json!(1080))].into(),
    }
}

#[tokio::test]
async fn get_missing_room_is_not_found() {
    let state = test_helpers::test_app_state();
    let response = get_content(State(state), Path(Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let state = test_helpers::test_app_state();
    let room_id = Uuid::new_v4();

    let response = put_content(State(state.clone()), Path(room_id), axum::Json(content())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get_content(State(state.clone()), Path(room_id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The store holds exactly what was put.
    let stored = state.store.read(room_id).await.unwrap().expect("content");
    assert_eq!(stored, content());
}

#[tokio::test]
async fn put_overwrites_previous_content() {
    let state = test_helpers::test_app_state();
    let room_id = Uuid::new_v4();

    put_content(State(state.clone()), Path(room_id), axum::Json(content())).await;

    let mut updated = content();
    updated.elements.push(Element::new("footer", "section", json!({"y": 900})));
    put_content(State(state.clone()), Path(room_id), axum::Json(updated.clone())).await;

    let stored = state.store.read(room_id).await.unwrap().expect("content");
    assert_eq!(stored.elements.len(), 2);
    assert_eq!(stored, updated);
}
