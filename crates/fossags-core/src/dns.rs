//! Captive DNS answers.
//!
//! While the portal is up every name resolves to the portal address, which
//! makes phones and laptops open the form on their own. Only the packet
//! format lives here; the platform crates own the UDP socket.

use std::net::Ipv4Addr;

/// Port the responder listens on.
pub const DNS_PORT: u16 = 53;

/// TTL of the forged answers, in seconds.
pub const ANSWER_TTL: u32 = 60;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const RCODE_NOT_IMPLEMENTED: u8 = 4;

fn read_u16(packet: &[u8], offset: usize) -> Option<u16> {
    let bytes = packet.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// End offset of the question starting right after the header, plus its
/// type and class.
fn parse_question(query: &[u8]) -> Option<(usize, u16, u16)> {
    let mut offset = HEADER_LEN;
    loop {
        let len = *query.get(offset)? as usize;
        offset += 1;
        if len == 0 {
            break;
        }
        // Compression pointers never appear in a question we can answer.
        if len & 0xC0 != 0 {
            return None;
        }
        offset += len;
    }
    let qtype = read_u16(query, offset)?;
    let qclass = read_u16(query, offset + 2)?;
    Some((offset + 4, qtype, qclass))
}

/// Dotted name asked for in `query`, for logging.
pub fn query_name(query: &[u8]) -> Option<String> {
    let (end, _, _) = parse_question(query)?;
    let mut labels = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < end - 5 {
        let len = query[offset] as usize;
        labels.push(String::from_utf8_lossy(&query[offset + 1..offset + 1 + len]).into_owned());
        offset += 1 + len;
    }
    Some(labels.join("."))
}

fn header(query: &[u8], rcode: u8, answers: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&query[0..2]);
    // QR + AA, echo RD; RA + rcode.
    out.push(0x84 | (query[2] & 0x01));
    out.push(0x80 | rcode);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&answers.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out
}

/// Build the reply to a DNS `query`.
///
/// A standard query for an `A` record gets a single answer pointing at
/// `portal_ip`. Any other single-question query gets "not implemented".
/// Returns `None` for packets that must be dropped: truncated packets,
/// responses, and queries without exactly one parseable question.
pub fn captive_response(query: &[u8], portal_ip: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN || query[2] & 0x80 != 0 {
        return None;
    }
    if read_u16(query, 4)? != 1 {
        return None;
    }

    let (question_end, qtype, qclass) = parse_question(query)?;
    let opcode = (query[2] >> 3) & 0x0F;
    let question = &query[HEADER_LEN..question_end];

    if opcode != 0 || qtype != TYPE_A || qclass != CLASS_IN {
        let mut out = header(query, RCODE_NOT_IMPLEMENTED, 0);
        out.extend_from_slice(question);
        return Some(out);
    }

    let mut out = header(query, 0, 1);
    out.extend_from_slice(question);
    // Name as a pointer to the question at offset 12.
    out.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
    out.extend_from_slice(&TYPE_A.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&portal_ip.octets());
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTAL: Ipv4Addr = Ipv4Addr::new(192, 168, 71, 1);

    fn query(name: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![0xAB, 0xCD, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        for label in name.split('.') {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&CLASS_IN.to_be_bytes());
        packet
    }

    #[test]
    fn test_a_query_answered_with_portal_ip() {
        let q = query("connectivitycheck.gstatic.com", TYPE_A);
        let reply = captive_response(&q, PORTAL).unwrap();

        assert_eq!(&reply[0..2], &[0xAB, 0xCD]);
        assert_eq!(reply[2] & 0x80, 0x80);
        assert_eq!(reply[2] & 0x01, 0x01);
        assert_eq!(reply[3] & 0x0F, 0);
        assert_eq!(read_u16(&reply, 6), Some(1));
        assert_eq!(&reply[reply.len() - 4..], &[192, 168, 71, 1]);
        assert_eq!(reply.len(), q.len() + 16);
    }

    #[test]
    fn test_other_types_not_implemented() {
        let q = query("captive.apple.com", 28);
        let reply = captive_response(&q, PORTAL).unwrap();

        assert_eq!(reply[3] & 0x0F, RCODE_NOT_IMPLEMENTED);
        assert_eq!(read_u16(&reply, 6), Some(0));
        assert_eq!(reply.len(), q.len());
    }

    #[test]
    fn test_malformed_packets_dropped() {
        assert_eq!(captive_response(&[0; 5], PORTAL), None);

        let mut truncated = query("example.com", TYPE_A);
        truncated.truncate(truncated.len() - 3);
        assert_eq!(captive_response(&truncated, PORTAL), None);

        let mut response = query("example.com", TYPE_A);
        response[2] |= 0x80;
        assert_eq!(captive_response(&response, PORTAL), None);
    }

    #[test]
    fn test_query_name() {
        let q = query("www.msftconnecttest.com", TYPE_A);
        assert_eq!(query_name(&q).as_deref(), Some("www.msftconnecttest.com"));
    }
}
