use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State as AxumState},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    cart::Cart,
    catalog::Food,
    error::AppError,
    payments::{self, CallbackEnvelope, PollStatus},
    state::State,
    user::UserId,
};

#[derive(Deserialize)]
pub struct BrowseParams {
    pub search: Option<String>,
    pub category: Option<String>,
}

pub async fn browse_foods(
    AxumState(state): AxumState<Arc<State>>,
    Query(params): Query<BrowseParams>,
) -> Json<Vec<Food>> {
    let foods = state
        .catalog
        .browse(params.search.as_deref(), params.category.as_deref())
        .await;

    Json(foods)
}

#[derive(Serialize)]
pub struct CartResponse {
    pub cart: Cart,
    pub total: Decimal,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        let total = cart.total();
        Self { cart, total }
    }
}

pub async fn view_cart(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
) -> Json<CartResponse> {
    Json(state.carts.active_cart(user.0).await.into())
}

pub async fn add_to_cart(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
    Path(food_id): Path<u64>,
) -> Result<Json<CartResponse>, AppError> {
    let food = state
        .catalog
        .get(food_id)
        .await
        .ok_or(AppError::RecordNotFound)?;

    let cart = state.carts.add_item(user.0, &food, 1).await?;
    Ok(Json(cart.into()))
}

#[derive(Deserialize)]
pub struct QuantityUpdate {
    pub quantity: u32,
}

pub async fn update_cart_item(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
    Path(item_id): Path<u64>,
    Json(update): Json<QuantityUpdate>,
) -> Result<Json<CartResponse>, AppError> {
    let cart = state
        .carts
        .set_quantity(user.0, item_id, update.quantity)
        .await?;

    Ok(Json(cart.into()))
}

pub async fn remove_cart_item(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
    Path(item_id): Path<u64>,
) -> Result<Json<CartResponse>, AppError> {
    let cart = state.carts.remove_item(user.0, item_id).await?;
    Ok(Json(cart.into()))
}

pub async fn clear_cart(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
) -> Json<CartResponse> {
    Json(state.carts.clear(user.0).await.into())
}

#[derive(Deserialize)]
pub struct InitiateRequest {
    pub phone_number: String,
}

pub async fn initiate_payment(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
    Json(request): Json<InitiateRequest>,
) -> Result<Json<Value>, AppError> {
    let record = payments::initiate(&state, user.0, &request.phone_number).await?;

    Ok(Json(json!({
        "success": true,
        "payment_id": record.id,
        "message": "Payment request sent. Please check your phone."
    })))
}

fn parse_envelope(body: &Bytes) -> Result<CallbackEnvelope, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Malformed callback payload: {e}");
        AppError::MalformedCallback
    })
}

/// Provider webhook. Takes the raw body so an unparseable envelope is ours
/// to answer; anything past the envelope acks success, including an
/// unmatched correlation id, or the provider retries forever.
pub async fn mpesa_callback(
    AxumState(state): AxumState<Arc<State>>,
    body: Bytes,
) -> Json<Value> {
    let envelope = match parse_envelope(&body) {
        Ok(envelope) => envelope,
        Err(_) => {
            return Json(json!({ "ResultCode": 1, "ResultDesc": "Failed" }));
        }
    };

    payments::apply_callback(&state, envelope.body.stk_callback).await;

    Json(json!({ "ResultCode": 0, "ResultDesc": "Success" }))
}

pub async fn check_payment_status(
    AxumState(state): AxumState<Arc<State>>,
    user: UserId,
    Path(payment_id): Path<u64>,
) -> Result<Json<PollStatus>, AppError> {
    let status = payments::poll(&state, user.0, payment_id).await?;
    Ok(Json(status))
}
