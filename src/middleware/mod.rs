mod remote_ip;

pub use remote_ip::{ForwardedRequest, RemoteIpState, remote_ip_middleware};
