//! Minimal SSDP client: one multicast M-SEARCH, then collect replies until a deadline.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use indexmap::IndexMap;
use indexmap::map::Entry;
use log::debug;

use crate::errors::Error;
use crate::runtime::{self, AsyncUdpSocket, Instant, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const MULTICAST_TARGET: &str = "239.255.255.250:1900";
const STATUS_LINE: &str = "HTTP/1.1 200 OK";

/// Search target matching every UPnP root device.
pub const ROOT_DEVICE: &str = "upnp:rootdevice";

/// Parameters of one M-SEARCH round.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub search_target: String,
    /// Sent as `MX`; devices spread their replies over this many seconds.
    pub max_wait: Duration,
    /// How long to listen for replies after sending.
    pub socket_timeout: Duration,
    pub ttl: u32,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            search_target: ROOT_DEVICE.to_string(),
            max_wait: Duration::from_secs(1),
            socket_timeout: Duration::from_millis(500),
            ttl: 2,
        }
    }
}

impl SearchRequest {
    fn message(&self) -> String {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {MULTICAST_TARGET}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n\
             USER-AGENT: {}/{} UPnP/1.1 hue-lights-rs/{}\r\n\
             \r\n",
            self.max_wait.as_secs().max(1),
            self.search_target,
            std::env::consts::OS,
            std::env::consts::ARCH,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

/// One reply to a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpResponse {
    pub source: SocketAddr,
    /// Headers in arrival order, names uppercased.
    pub headers: IndexMap<String, String>,
}

impl SsdpResponse {
    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_uppercase()).map(String::as_str)
    }
}

/// Something that can run an SSDP search round.
pub trait ServiceSearch: Send + Sync {
    fn search(&self, request: &SearchRequest) -> impl Future<Output = Result<Vec<SsdpResponse>>> + Send;
}

/// [`ServiceSearch`] over a real UDP multicast socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsdpClient;

impl ServiceSearch for SsdpClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SsdpResponse>> {
        search_with::<UdpSocket>(request).await
    }
}

/// Send one M-SEARCH and collect every well-formed reply until the socket timeout.
///
/// Socket setup failures are errors. Silence is not: a round without any
/// reply yields an empty list.
pub(crate) async fn search_with<S: AsyncUdpSocket>(request: &SearchRequest) -> Result<Vec<SsdpResponse>> {
    let socket = S::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::socket("bind", e))?;
    socket
        .join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)
        .map_err(|e| Error::socket("join_multicast_v4", e))?;
    socket
        .set_multicast_ttl_v4(request.ttl)
        .map_err(|e| Error::socket("set_multicast_ttl_v4", e))?;

    debug!("M-SEARCH for {} (timeout {:?})", request.search_target, request.socket_timeout);
    socket
        .send_to(request.message().as_bytes(), MULTICAST_TARGET)
        .await
        .map_err(|e| Error::socket("send_to", e))?;

    let mut responses = Vec::new();
    let mut buffer = [0u8; 4096];
    let start = Instant::now();

    while let Some(remaining) = request.socket_timeout.checked_sub(start.elapsed()) {
        match runtime::timeout(remaining, socket.recv_from(&mut buffer)).await {
            Ok(Ok((size, source))) => match parse_response(source, &buffer[..size]) {
                Some(response) => {
                    debug!("SSDP reply from {source}: {:?}", response.header("USN"));
                    responses.push(response);
                }
                None => debug!("ignoring malformed SSDP reply from {source}"),
            },
            Ok(Err(err)) => return Err(Error::socket("recv_from", err)),
            Err(_) => break,
        }
    }

    Ok(responses)
}

/// Parse an SSDP reply datagram. Returns `None` unless it is a UTF-8 `200 OK` reply.
///
/// Header lines that do not parse are skipped; the rest of the reply is kept.
pub(crate) fn parse_response(source: SocketAddr, datagram: &[u8]) -> Option<SsdpResponse> {
    let text = std::str::from_utf8(datagram).ok()?;
    let mut lines = text.lines();
    if !lines.next()?.trim_end().eq_ignore_ascii_case(STATUS_LINE) {
        return None;
    }

    let mut headers: IndexMap<String, String> = IndexMap::new();
    let mut last: Option<String> = None;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            // continuation of the previous header
            match last.as_ref().and_then(|name| headers.get_mut(name)) {
                Some(value) => {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                None => debug!("SSDP reply from {source}: dangling continuation line {line:?}"),
            }
            continue;
        }

        let Some((name, value)) = line.split_once(':').filter(|(name, _)| !name.trim().is_empty()) else {
            debug!("SSDP reply from {source}: skipping header line {line:?}");
            last = None;
            continue;
        };
        let name = name.trim().to_ascii_uppercase();
        let value = value.trim();
        match headers.entry(name.clone()) {
            Entry::Occupied(mut existing) => {
                let merged = existing.get_mut();
                merged.push(',');
                merged.push_str(value);
            }
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
            }
        }
        last = Some(name);
    }

    Some(SsdpResponse { source, headers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    fn source() -> SocketAddr {
        "192.168.1.20:1900".parse().unwrap()
    }

    const BRIDGE_REPLY: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=100\r\n\
        EXT:\r\n\
        LOCATION: http://192.168.1.20:80/description.xml\r\n\
        SERVER: Linux/3.14.0 UPnP/1.0 IpBridge/1.16.0\r\n\
        hue-bridgeid: 001788FFFE100491\r\n\
        ST: upnp:rootdevice\r\n\
        USN: uuid:2f402f80-da50-11e1-9b23-001788100491::upnp:rootdevice\r\n\
        \r\n";

    #[test]
    fn test_parse_bridge_reply() {
        let response = parse_response(source(), BRIDGE_REPLY.as_bytes()).unwrap();

        assert_eq!(response.source, source());
        assert_eq!(response.header("location"), Some("http://192.168.1.20:80/description.xml"));
        assert_eq!(response.header("HUE-BRIDGEID"), Some("001788FFFE100491"));
        assert_eq!(response.header("EXT"), Some(""));
        let names: Vec<&str> = response.headers.keys().map(String::as_str).collect();
        assert_eq!(names[..3], ["CACHE-CONTROL", "EXT", "LOCATION"]);
    }

    #[test]
    fn test_continuation_and_duplicates() {
        let reply = "HTTP/1.1 200 OK\r\n\
            SERVER: Linux/3.14.0\r\n\
            \tUPnP/1.0 IpBridge/1.16.0\r\n\
            Opt: one\r\n\
            OPT: two\r\n";
        let response = parse_response(source(), reply.as_bytes()).unwrap();

        assert_eq!(response.header("SERVER"), Some("Linux/3.14.0 UPnP/1.0 IpBridge/1.16.0"));
        assert_eq!(response.header("OPT"), Some("one,two"));
    }

    #[test]
    fn test_malformed_replies() {
        let notify = "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\n";
        assert!(parse_response(source(), notify.as_bytes()).is_none());
        assert!(parse_response(source(), b"HTTP/1.1 404 Not Found\r\n").is_none());
        assert!(parse_response(source(), &[0xff, 0xfe, 0x00]).is_none());
    }

    #[test]
    fn test_bad_header_lines_are_skipped() {
        let reply = "HTTP/1.1 200 OK\r\n\
            \tdangling continuation\r\n\
            LOCATION: http://192.168.1.20:80/description.xml\r\n\
            stray-line-without-colon\r\n\
            \tbelongs to nothing\r\n\
            : no name\r\n\
            SERVER: Linux/3.14.0 UPnP/1.0 IpBridge/1.16.0\r\n\
            USN: uuid:2f402f80-da50-11e1-9b23-001788100491::upnp:rootdevice\r\n";
        let response = parse_response(source(), reply.as_bytes()).unwrap();

        assert_eq!(response.headers.len(), 3);
        assert_eq!(response.header("LOCATION"), Some("http://192.168.1.20:80/description.xml"));
        assert_eq!(response.header("SERVER"), Some("Linux/3.14.0 UPnP/1.0 IpBridge/1.16.0"));
        assert!(response.header("USN").unwrap().starts_with("uuid:2f402f80"));
    }

    #[test]
    fn test_search_message() {
        let request = SearchRequest {
            max_wait: Duration::from_secs(3),
            ..Default::default()
        };
        let message = request.message();

        assert!(message.starts_with("M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\n"));
        assert!(message.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(message.contains("MX: 3\r\n"));
        assert!(message.contains("ST: upnp:rootdevice\r\n"));
        assert!(message.contains(" UPnP/1.1 hue-lights-rs/"));
        assert!(message.ends_with("\r\n\r\n"));
    }

    /// Answers with a fixed set of datagrams, then stays silent.
    struct ScriptedSocket {
        replies: Mutex<VecDeque<&'static [u8]>>,
    }

    impl AsyncUdpSocket for ScriptedSocket {
        async fn bind(_addr: &str) -> io::Result<Self> {
            Ok(ScriptedSocket {
                replies: Mutex::new(VecDeque::from([BRIDGE_REPLY.as_bytes(), b"garbage".as_slice()])),
            })
        }

        async fn send_to(&self, buf: &[u8], _addr: &str) -> io::Result<usize> {
            Ok(buf.len())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(reply) => {
                    buf[..reply.len()].copy_from_slice(reply);
                    Ok((reply.len(), source()))
                }
                None => std::future::pending().await,
            }
        }

        fn join_multicast_v4(&self, _group: Ipv4Addr, _interface: Ipv4Addr) -> io::Result<()> {
            Ok(())
        }

        fn set_multicast_ttl_v4(&self, _ttl: u32) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_collects_until_timeout() {
        let request = SearchRequest {
            socket_timeout: Duration::from_millis(2000),
            ..Default::default()
        };
        let start = Instant::now();
        let responses = search_with::<ScriptedSocket>(&request).await.unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].header("ST"), Some("upnp:rootdevice"));
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }
}
