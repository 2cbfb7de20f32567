use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::{call, reply, Channels};
use crate::services::users::UserRequest;

pub async fn get_user_details(
    State(state): State<Channels>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetUser {
        id: user_id,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

pub async fn get_profile(State(state): State<Channels>, Path(user_id): Path<i64>) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetProfile {
        id: user_id,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}

pub async fn get_referrals(
    State(state): State<Channels>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let result = call(&state.user_channel, |response| UserRequest::GetReferrals {
        id: user_id,
        response,
    })
    .await;

    reply(result, StatusCode::OK)
}
