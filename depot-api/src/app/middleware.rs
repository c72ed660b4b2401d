use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use super::state::AppState;

/// 要求运维 token 的 Extractor（`Authorization: Bearer <token>`）
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin;

impl FromRequestParts<AppState> for RequireAdmin {
	type Rejection = ApiError;

	fn from_request_parts<'a, 'b, 'c>(
		parts: &'a mut Parts,
		state: &'b AppState,
	) -> Pin<Box<dyn Future<Output = Result<Self, Self::Rejection>> + Send + 'c>>
	where
		'a: 'c,
		'b: 'c,
	{
		Box::pin(async move {
			let expected = state
				.admin_token
				.as_deref()
				.ok_or_else(|| ApiError::forbidden("admin access disabled"))?;

			let presented = parts
				.headers
				.get(axum::http::header::AUTHORIZATION)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.strip_prefix("Bearer "))
				.ok_or_else(ApiError::unauthorized)?;

			// 常量时间比较，避免时序侧信道
			if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
				Ok(RequireAdmin)
			} else {
				Err(ApiError::unauthorized())
			}
		})
	}
}

/// 不参与节流的路径
const UNTHROTTLED_PATHS: &[&str] = &["/health"];

/// 从请求中提取客户端 IP
/// 信任代理头时：X-Real-IP > X-Forwarded-For（第一个） > Socket Address；
/// 否则只使用 Socket Address，客户端可随意伪造这些头。
fn extract_client_ip(request: &Request<Body>, trust_proxy_headers: bool) -> String {
	if trust_proxy_headers {
		if let Some(ip) = proxied_client_ip(request) {
			return ip;
		}
	}

	request
		.extensions()
		.get::<ConnectInfo<SocketAddr>>()
		.map(|ci| ci.0.ip().to_string())
		.unwrap_or_else(|| "unknown".to_string())
}

fn proxied_client_ip(request: &Request<Body>) -> Option<String> {
	// 1. 优先从 X-Real-IP header 获取（Nginx 常用）
	if let Some(real_ip) = request
		.headers()
		.get("X-Real-IP")
		.and_then(|v| v.to_str().ok())
		.map(str::trim)
		.filter(|s| !s.is_empty())
	{
		return Some(real_ip.to_string());
	}

	// 2. 从 X-Forwarded-For 获取第一个 IP（最左边是真实客户端）
	if let Some(forwarded) = request
		.headers()
		.get("X-Forwarded-For")
		.and_then(|v| v.to_str().ok())
	{
		if let Some(first_ip) = forwarded.split(',').next().map(|s| s.trim()) {
			if !first_ip.is_empty() {
				return Some(first_ip.to_string());
			}
		}
	}

	None
}

/// 慢请求：任何写操作，以及构件下载
fn is_slow_request(method: &Method, path: &str) -> bool {
	match *method {
		Method::PUT | Method::POST | Method::DELETE => true,
		Method::GET => path.starts_with("/artifacts/"),
		_ => false,
	}
}

pub async fn throttle_middleware(
	State(state): State<AppState>,
	request: Request<Body>,
	next: Next,
) -> Result<Response, ApiError> {
	let path = request.uri().path().to_string();

	if UNTHROTTLED_PATHS.iter().any(|p| path == *p) {
		return Ok(next.run(request).await);
	}

	let client_ip = extract_client_ip(&request, state.trust_proxy_headers);
	let is_slow = is_slow_request(request.method(), &path);

	if state.throttler.should_throttle(&client_ip, is_slow) {
		let remaining = state.throttler.remaining_ban_time(&client_ip);
		tracing::warn!(
			client = %client_ip,
			path = %path,
			slow = is_slow,
			remaining_ms = remaining.as_millis() as u64,
			"request throttled"
		);
		return Err(ApiError::too_many_requests(remaining));
	}

	Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(headers: &[(&str, &str)]) -> Request<Body> {
		let mut builder = Request::builder().uri("/artifacts");
		for (name, value) in headers {
			builder = builder.header(*name, *value);
		}
		builder.body(Body::empty()).unwrap()
	}

	#[test]
	fn client_ip_prefers_real_ip_header() {
		let req = request(&[("X-Real-IP", "10.1.1.1"), ("X-Forwarded-For", "10.2.2.2")]);
		assert_eq!(extract_client_ip(&req, true), "10.1.1.1");
	}

	#[test]
	fn client_ip_uses_first_forwarded_hop() {
		let req = request(&[("X-Forwarded-For", " 10.2.2.2 , 172.16.0.1")]);
		assert_eq!(extract_client_ip(&req, true), "10.2.2.2");
	}

	#[test]
	fn client_ip_falls_back_to_socket() {
		let mut req = request(&[]);
		req.extensions_mut()
			.insert(ConnectInfo(SocketAddr::from(([192, 168, 0, 7], 5000))));
		assert_eq!(extract_client_ip(&req, true), "192.168.0.7");
		assert_eq!(extract_client_ip(&request(&[]), true), "unknown");
	}

	#[test]
	fn proxy_headers_ignored_unless_trusted() {
		let mut req = request(&[("X-Real-IP", "10.1.1.1"), ("X-Forwarded-For", "10.2.2.2")]);
		req.extensions_mut()
			.insert(ConnectInfo(SocketAddr::from(([192, 168, 0, 7], 5000))));
		assert_eq!(extract_client_ip(&req, false), "192.168.0.7");
	}

	#[test]
	fn downloads_and_writes_are_slow() {
		assert!(is_slow_request(&Method::PUT, "/artifacts/a.zip"));
		assert!(is_slow_request(&Method::GET, "/artifacts/a.zip"));
		assert!(is_slow_request(&Method::POST, "/admin/snapshot"));
		assert!(!is_slow_request(&Method::GET, "/artifacts"));
		assert!(!is_slow_request(&Method::GET, "/admin/maintenance"));
	}
}
