use crate::descriptor::RequestDescriptor;

/// Reconstructs the absolute URL reported to a `PairObserver` and written to
/// a `RecordSink`: scheme from tunnel/plain selection, authority from the
/// `CONNECT` target or absolute-form host, path+query from the rewritten
/// origin-form target, default port elided.
pub fn reconstruct_url(scheme: &str, host: &str, port: u16, target: &RequestDescriptor) -> String {
    let default_port = if scheme == "https" { 443 } else { 80 };
    let authority = if port == default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    };
    format!("{scheme}://{authority}{}", target.target)
}
