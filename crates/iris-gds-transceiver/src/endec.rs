//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Symmetric frame transformers: SLIP, IPv4/UDP, and identity."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{Result, TransceiverError};

/// Symmetric byte transformer applied to whole frames.
pub trait Endec: fmt::Debug + Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Wrap `data` for the link.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Unwrap a frame received from the link.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Ordered endecs. Encoding applies them first to last, so the last one is
/// the outermost layer on the wire; decoding peels them last to first.
#[derive(Debug, Default)]
pub struct EndecChain {
    endecs: Vec<Box<dyn Endec>>,
}

impl EndecChain {
    /// Empty chain (identity).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outer layer.
    pub fn with(mut self, endec: impl Endec + 'static) -> Self {
        self.endecs.push(Box::new(endec));
        self
    }

    /// Append an outer layer in place.
    pub fn push(&mut self, endec: Box<dyn Endec>) {
        self.endecs.push(endec);
    }

    /// Names from innermost to outermost.
    pub fn names(&self) -> Vec<&'static str> {
        self.endecs.iter().map(|e| e.name()).collect()
    }

    /// Apply every layer for uplink.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.endecs
            .iter()
            .try_fold(data.to_vec(), |bytes, endec| endec.encode(&bytes))
    }

    /// Peel every layer from a downlinked frame.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.endecs
            .iter()
            .rev()
            .try_fold(data.to_vec(), |bytes, endec| endec.decode(&bytes))
    }
}

/// Identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnityEndec;

impl Endec for UnityEndec {
    fn name(&self) -> &'static str {
        "unity"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// RFC 1055 Serial Line Internet Protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlipEndec;

impl SlipEndec {
    /// Frame delimiter.
    pub const END: u8 = 0xC0;
    /// Escape byte.
    pub const ESC: u8 = 0xDB;
    /// Escaped `END`.
    pub const ESC_END: u8 = 0xDC;
    /// Escaped `ESC`.
    pub const ESC_ESC: u8 = 0xDD;
}

impl Endec for SlipEndec {
    fn name(&self) -> &'static str {
        "slip"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() + 2);
        out.push(Self::END);
        for &byte in data {
            match byte {
                Self::END => out.extend([Self::ESC, Self::ESC_END]),
                Self::ESC => out.extend([Self::ESC, Self::ESC_ESC]),
                other => out.push(other),
            }
        }
        out.push(Self::END);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let start = data.iter().position(|&b| b != Self::END).unwrap_or(data.len());
        let end = data.iter().rposition(|&b| b != Self::END).map_or(start, |i| i + 1);
        let body = &data[start..end];

        let mut out = Vec::with_capacity(body.len());
        let mut bytes = body.iter().copied().enumerate();
        while let Some((i, byte)) = bytes.next() {
            match byte {
                Self::END => {
                    return Err(TransceiverError::decoding(
                        "slip",
                        format!("unescaped END at offset {i}"),
                    ))
                }
                Self::ESC => match bytes.next() {
                    Some((_, Self::ESC_END)) => out.push(Self::END),
                    Some((_, Self::ESC_ESC)) => out.push(Self::ESC),
                    Some((j, other)) => {
                        return Err(TransceiverError::decoding(
                            "slip",
                            format!("invalid escape {other:#04x} at offset {j}"),
                        ))
                    }
                    None => return Err(TransceiverError::decoding("slip", "trailing ESC")),
                },
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

/// Splits a SLIP byte stream into frames on runs of `END`.
///
/// Yielded frames are still escaped; [`SlipEndec`] unescapes them. At end of
/// stream any buffered bytes are yielded as a final frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlipFramer;

impl Decoder for SlipFramer {
    type Item = Vec<u8>;
    type Error = TransceiverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let leading = src.iter().take_while(|&&b| b == SlipEndec::END).count();
        src.advance(leading);
        match src.iter().position(|&b| b == SlipEndec::END) {
            Some(end) => {
                let frame = src.split_to(end).to_vec();
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split().to_vec()))
        }
    }
}

const IPV4_MIN_HEADER: usize = 20;
const UDP_HEADER: usize = 8;
const PROTO_UDP: u8 = 17;

/// Borrowed view of an IPv4 datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ipv4Datagram<'a> {
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Bytes after the IP header, limited to the header's total length.
    pub body: &'a [u8],
}

impl<'a> Ipv4Datagram<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < IPV4_MIN_HEADER {
            return Err(TransceiverError::decoding(
                "ip-udp",
                format!("{} bytes is shorter than an IPv4 header", data.len()),
            ));
        }
        if data[0] >> 4 != 4 {
            return Err(TransceiverError::decoding(
                "ip-udp",
                format!("IP version {} is not 4", data[0] >> 4),
            ));
        }
        let header_len = usize::from(data[0] & 0x0F) * 4;
        let total_len = usize::from(u16::from_be_bytes([data[2], data[3]]));
        if header_len < IPV4_MIN_HEADER || total_len < header_len || total_len > data.len() {
            return Err(TransceiverError::decoding(
                "ip-udp",
                format!(
                    "inconsistent IPv4 lengths: header {header_len}, total {total_len}, have {}",
                    data.len()
                ),
            ));
        }
        Ok(Self {
            protocol: data[9],
            source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            body: &data[header_len..total_len],
        })
    }

    /// `(destination port, payload)` when this carries a well-formed UDP
    /// datagram.
    pub(crate) fn udp(&self) -> Option<(u16, &'a [u8])> {
        if self.protocol != PROTO_UDP || self.body.len() < UDP_HEADER {
            return None;
        }
        let dest_port = u16::from_be_bytes([self.body[2], self.body[3]]);
        let udp_len = usize::from(u16::from_be_bytes([self.body[4], self.body[5]]));
        let end = udp_len.clamp(UDP_HEADER, self.body.len());
        Some((dest_port, &self.body[UDP_HEADER..end]))
    }
}

/// One's complement sum of 16-bit words, as used by the IPv4 header.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|w| u32::from(u16::from_be_bytes([w[0], *w.get(1).unwrap_or(&0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Wraps frames in IPv4 and UDP headers with fixed endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpUdpEndec {
    /// Source written on uplink.
    pub source: SocketAddrV4,
    /// Destination written on uplink.
    pub destination: SocketAddrV4,
}

impl IpUdpEndec {
    const TTL: u8 = 64;

    /// Endec between `source` and `destination`.
    pub fn new(source: SocketAddrV4, destination: SocketAddrV4) -> Self {
        Self { source, destination }
    }

    /// Endec from `ip:port` strings, as found in configuration.
    pub fn parse(source: &str, destination: &str) -> Result<Self> {
        let addr = |s: &str| {
            s.parse::<SocketAddrV4>()
                .map_err(|err| TransceiverError::Config(format!("bad ip:port {s:?}: {err}")))
        };
        Ok(Self::new(addr(source)?, addr(destination)?))
    }
}

impl Endec for IpUdpEndec {
    fn name(&self) -> &'static str {
        "ip-udp"
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let udp_len = UDP_HEADER + data.len();
        let total = IPV4_MIN_HEADER + udp_len;
        let total_u16 = u16::try_from(total).map_err(|_| {
            TransceiverError::encoding("ip-udp", format!("{} bytes do not fit one datagram", data.len()))
        })?;

        let mut out = Vec::with_capacity(total);
        out.extend([0x45, 0x00]);
        out.extend(total_u16.to_be_bytes());
        out.extend([0x00, 0x00, 0x40, 0x00, Self::TTL, PROTO_UDP, 0x00, 0x00]);
        out.extend(self.source.ip().octets());
        out.extend(self.destination.ip().octets());
        let checksum = internet_checksum(&out);
        out[10..12].copy_from_slice(&checksum.to_be_bytes());

        out.extend(self.source.port().to_be_bytes());
        out.extend(self.destination.port().to_be_bytes());
        out.extend((udp_len as u16).to_be_bytes());
        // UDP checksum is optional over IPv4.
        out.extend([0x00, 0x00]);
        out.extend_from_slice(data);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let datagram = Ipv4Datagram::parse(data)?;
        match datagram.udp() {
            Some((_, payload)) => Ok(payload.to_vec()),
            None => {
                warn!(
                    protocol = datagram.protocol,
                    len = datagram.body.len(),
                    "IP layer does not carry UDP, passing its body through"
                );
                Ok(datagram.body.to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slip_escapes_both_special_bytes() {
        let slip = SlipEndec;
        let encoded = slip.encode(&[0x01, 0xC0, 0xDB, 0x02]).expect("encode");
        assert_eq!(encoded, [0xC0, 0x01, 0xDB, 0xDC, 0xDB, 0xDD, 0x02, 0xC0]);
        assert_eq!(slip.decode(&encoded).expect("decode"), [0x01, 0xC0, 0xDB, 0x02]);
    }

    #[test]
    fn slip_rejects_bare_end_and_trailing_esc() {
        let slip = SlipEndec;
        assert!(slip.decode(&[0xC0, 0x01, 0xC0, 0x02, 0xC0]).is_err());
        assert!(matches!(
            slip.decode(&[0x01, 0xDB]),
            Err(TransceiverError::Decoding { endec: "slip", .. })
        ));
        assert!(slip.decode(&[0xDB, 0x05]).is_err());
    }

    #[test]
    fn framer_splits_on_end_runs_and_flushes_at_eof() {
        let mut framer = SlipFramer;
        let mut buf = BytesMut::from(&[0xC0, 0xC0, 0x01, 0x02, 0xC0, 0xC0, 0x03, 0xC0, 0x04][..]);
        assert_eq!(framer.decode(&mut buf).expect("frame"), Some(vec![0x01, 0x02]));
        assert_eq!(framer.decode(&mut buf).expect("frame"), Some(vec![0x03]));
        assert_eq!(framer.decode(&mut buf).expect("partial"), None);
        assert_eq!(framer.decode_eof(&mut buf).expect("flush"), Some(vec![0x04]));
        assert!(buf.is_empty());
    }

    #[test]
    fn ip_udp_wraps_with_valid_header_checksum() {
        let endec = IpUdpEndec::parse("192.168.1.2:8080", "192.168.1.3:42000").expect("addrs");
        let wrapped = endec.encode(b"iris").expect("encode");
        assert_eq!(wrapped.len(), 20 + 8 + 4);
        assert_eq!(internet_checksum(&wrapped[..20]), 0);
        let datagram = Ipv4Datagram::parse(&wrapped).expect("parse");
        assert_eq!(datagram.destination, Ipv4Addr::new(192, 168, 1, 3));
        assert_eq!(datagram.udp(), Some((42000, &b"iris"[..])));
        assert_eq!(endec.decode(&wrapped).expect("decode"), b"iris");
    }

    #[test]
    fn oversized_payload_is_an_encoding_error() {
        let endec = IpUdpEndec::parse("10.0.0.1:1", "10.0.0.2:2").expect("addrs");
        let err = endec.encode(&vec![0u8; 65_536]).expect_err("too large");
        assert!(matches!(err, TransceiverError::Encoding { endec: "ip-udp", .. }));
        assert!(err.to_string().starts_with("encoding failed in ip-udp"));
    }

    #[test]
    fn non_udp_bodies_pass_through() {
        let endec = IpUdpEndec::parse("10.0.0.1:1", "10.0.0.2:2").expect("addrs");
        let mut wrapped = endec.encode(b"abc").expect("encode");
        wrapped[9] = 6;
        let body = endec.decode(&wrapped).expect("decode");
        assert_eq!(body.len(), 8 + 3);
        assert!(endec.decode(&wrapped[..10]).is_err());
    }

    #[test]
    fn chain_encodes_inner_first_and_decodes_outer_first() {
        let chain = EndecChain::new()
            .with(IpUdpEndec::parse("10.0.0.1:1", "10.0.0.2:2").expect("addrs"))
            .with(SlipEndec);
        assert_eq!(chain.names(), ["ip-udp", "slip"]);
        let wire = chain.encode(&[0xC0, 0x10]).expect("encode");
        assert_eq!(wire.first(), Some(&SlipEndec::END));
        assert_eq!(chain.decode(&wire).expect("decode"), [0xC0, 0x10]);
    }
}
