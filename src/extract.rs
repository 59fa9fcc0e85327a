//! Pulling the caller's origin and credential out of an HTTP request.

use axum::extract::{ConnectInfo, Query, Request};
use std::collections::HashMap;
use std::net::SocketAddr;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY_PARAM: &str = "api_key";
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Client origin: first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_origin(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            let ip_str = ip_str.trim();
            if !ip_str.is_empty() {
                return ip_str.to_string();
            }
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else if let Some(addr) = request.extensions().get::<SocketAddr>() {
        addr.ip().to_string()
    } else {
        UNKNOWN_ORIGIN.to_string()
    }
}

/// Credential from the `X-API-Key` header, falling back to the `api_key` query parameter.
/// Blank values count as absent.
pub fn api_key(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if from_header.is_some() {
        return from_header;
    }

    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove(API_KEY_QUERY_PARAM))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
