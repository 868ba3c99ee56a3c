use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// 请求方的网络指纹，由边缘注入的头得出。
/// 匿名投票去重的唯一依据，伪造属于已接受的局限。
#[derive(Debug, Clone)]
pub struct Fingerprint(pub Option<String>);

/// 提取顺序：x-real-ip，x-forwarded-for 第一个非空项，连接地址
pub fn client_fingerprint(headers: &HeaderMap, remote: Option<&SocketAddr>) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

pub async fn fingerprint_middleware(mut req: Request<Body>, next: Next) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let fingerprint = client_fingerprint(req.headers(), remote.as_ref());
    tracing::debug!("request fingerprint: {:?}", fingerprint);

    req.extensions_mut().insert(Fingerprint(fingerprint));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::client_fingerprint;
    use axum::http::HeaderMap;
    use std::net::SocketAddr;

    #[test]
    fn prefers_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.7".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(
            client_fingerprint(&headers, None),
            Some("203.0.113.7".to_string())
        );
    }

    #[test]
    fn falls_back_to_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.9, 10.0.0.2".parse().unwrap());
        assert_eq!(
            client_fingerprint(&headers, None),
            Some("198.51.100.9".to_string())
        );
    }

    #[test]
    fn falls_back_to_remote_addr() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.0.2.3:51234".parse().unwrap();
        assert_eq!(
            client_fingerprint(&headers, Some(&addr)),
            Some("192.0.2.3".to_string())
        );
    }

    #[test]
    fn empty_when_nothing_available() {
        let headers = HeaderMap::new();
        assert_eq!(client_fingerprint(&headers, None), None);
    }
}
