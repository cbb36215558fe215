//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let id = wire_header.header.id;

        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(id, buffer)?);
        }

        let answers = ResourceRecord::deserialise_section(id, wire_header.ancount, buffer)?;
        let authority = ResourceRecord::deserialise_section(id, wire_header.nscount, buffer)?;
        let additional = ResourceRecord::deserialise_section(id, wire_header.arcount, buffer)?;

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

/// A header as it appears on the wire, with the section counts.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from(flags2 & HEADER_MASK_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype: QueryType::from(qtype),
            qclass: QueryClass::from(qclass),
        })
    }
}

impl ResourceRecord {
    fn deserialise_section(
        id: u16,
        count: u16,
        buffer: &mut ConsumableBuffer,
    ) -> Result<Vec<Self>, Error> {
        let mut rrs = Vec::with_capacity(count.into());
        for _ in 0..count {
            rrs.push(Self::deserialise(id, buffer)?);
        }
        Ok(rrs)
    }

    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = RecordType::from(buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?);
        let rclass = RecordClass::from(buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?);
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position;

        // for records which include domain names, deserialise them to
        // expand pointers.
        let rtype_with_data = match rtype {
            RecordType::TXT => RecordTypeWithData::TXT {
                octets: raw_rdata(id, rdlength, buffer)?,
            },
            RecordType::SPF => RecordTypeWithData::SPF {
                octets: raw_rdata(id, rdlength, buffer)?,
            },
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: raw_rdata(id, rdlength, buffer)?,
            },
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::SOA => RecordTypeWithData::SOA {
                mname: DomainName::deserialise(id, buffer)?,
                rname: DomainName::deserialise(id, buffer)?,
                serial: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                refresh: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                retry: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                expire: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                minimum: buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(id, buffer)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                exchange: DomainName::deserialise(id, buffer)?,
            },
            RecordType::AAAA => {
                let octets = buffer.take(16).ok_or(Error::ResourceRecordTooShort(id))?;
                let mut address = [0u8; 16];
                address.copy_from_slice(octets);
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::from(address),
                }
            }
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                weight: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                port: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                target: DomainName::deserialise(id, buffer)?,
            },
        };

        if buffer.position == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                rtype_with_data,
                rclass,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

/// Uninterpreted RDATA, for types whose RDATA contains no domain
/// names.
fn raw_rdata(id: u16, rdlength: u16, buffer: &mut ConsumableBuffer) -> Result<Bytes, Error> {
    buffer
        .take(rdlength.into())
        .map(Bytes::copy_from_slice)
        .ok_or(Error::ResourceRecordTooShort(id))
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let mut labels = Vec::<Label>::with_capacity(5);
        let mut len = 0;
        let start = buffer.position;

        loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if usize::from(size) <= LABEL_MAX_LEN {
                len += 1;

                if size == 0 {
                    labels.push(Label::new());
                    break;
                }

                let octets = buffer
                    .take(size.into())
                    .ok_or(Error::DomainTooShort(id))?;
                let label = Label::try_from(octets).map_err(|_| Error::DomainLabelInvalid(id))?;
                len += usize::from(label.len());
                labels.push(label);

                if len > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong(id));
                }
            } else if size >= 192 {
                // this requires re-parsing the pointed-to domain -
                // not great but works for now.
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                // pointer must be to an earlier record (not merely a
                // different one: an earlier one: RFC 1035 section
                // 4.1.4)
                if ptr >= start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                let mut other = DomainName::deserialise(id, &mut buffer.at_offset(ptr))?;
                len += other.len;
                labels.append(&mut other.labels);
                break;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if len <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { labels, len })
        } else {
            Err(Error::DomainTooLong(id))
        }
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record's RDATA does not match its RDLENGTH.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer points to or after the current name.
    DomainPointerInvalid(u16),

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id)
            | Error::QuestionTooShort(id)
            | Error::ResourceRecordTooShort(id)
            | Error::ResourceRecordInvalid(id)
            | Error::DomainTooShort(id)
            | Error::DomainTooLong(id)
            | Error::DomainPointerInvalid(id)
            | Error::DomainLabelInvalid(id) => Some(id),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CompletelyBusted => write!(f, "message too short to contain an ID"),
            Error::HeaderTooShort(_) => write!(f, "header too short"),
            Error::QuestionTooShort(_) => write!(f, "question too short"),
            Error::ResourceRecordTooShort(_) => write!(f, "resource record too short"),
            Error::ResourceRecordInvalid(_) => write!(f, "resource record length mismatch"),
            Error::DomainTooShort(_) => write!(f, "domain name truncated"),
            Error::DomainTooLong(_) => write!(f, "domain name longer than 255 octets"),
            Error::DomainPointerInvalid(_) => write!(f, "domain name pointer does not point backwards"),
            Error::DomainLabelInvalid(_) => write!(f, "invalid domain label"),
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let octet = *self.octets.get(self.position)?;
        self.position += 1;
        Some(octet)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        let octets = self.take(2)?;
        Some(u16::from_be_bytes([octets[0], octets[1]]))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        let octets = self.take(4)?;
        Some(u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]))
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        let slice = self.octets.get(self.position..self.position + size)?;
        self.position += size;
        Some(slice)
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    fn parses_serialised_referral() {
        let mut response = referral(
            4321,
            "sub.example.com.",
            "example.com.",
            &["ns-1.awsdns-01.org.", "ns-2.awsdns-02.net."],
        );
        response.additional.push(a_record(
            "ns-1.awsdns-01.org.",
            Ipv4Addr::new(205, 251, 192, 1),
        ));
        response.answers.push(soa_record("example.com."));
        response.answers.push(txt_record("example.com.", "v=spf1 -all"));

        let octets = response.to_octets().unwrap();

        assert_eq!(Ok(response), Message::from_octets(&octets));
    }

    #[test]
    fn unknown_rdata_is_kept_opaque() {
        let mut response = Message::from_question(7, ns_question("example.com.")).make_response();
        response.answers.push(unknown_record("example.com.", &[1, 2, 3, 4, 5]));

        let octets = response.to_octets().unwrap();

        assert_eq!(Ok(response), Message::from_octets(&octets));
    }

    #[test]
    fn rcode_is_decoded() {
        let mut response = Message::from_question(9, ns_question("nope.example.")).make_response();
        response.header.rcode = Rcode::NameError;
        response.header.is_authoritative = true;

        let parsed = Message::from_octets(&response.to_octets().unwrap()).unwrap();

        assert_eq!(Rcode::NameError, parsed.header.rcode);
        assert!(parsed.header.is_authoritative);
        assert!(parsed.header.is_response);
    }

    #[test]
    fn empty_input_is_completely_busted() {
        assert_eq!(Err(Error::CompletelyBusted), Message::from_octets(&[]));
        assert_eq!(Err(Error::CompletelyBusted), Message::from_octets(&[1]));
    }

    #[test]
    fn short_header_keeps_id() {
        assert_eq!(
            Err(Error::HeaderTooShort(0x0102)),
            Message::from_octets(&[1, 2, 0, 0])
        );
    }

    #[test]
    fn forward_pointer_is_rejected() {
        // a name at offset 0 which points at offset 0
        let octets = [0b1100_0000, 0];
        assert_eq!(
            Err(Error::DomainPointerInvalid(5)),
            DomainName::deserialise(5, &mut ConsumableBuffer::new(&octets))
        );
    }

    #[test]
    fn backward_pointer_is_followed() {
        let mut octets = vec![3];
        octets.extend_from_slice(b"com");
        octets.push(0);
        let second = octets.len();
        octets.push(7);
        octets.extend_from_slice(b"example");
        octets.extend_from_slice(&[0b1100_0000, 0]);

        let mut buffer = ConsumableBuffer::new(&octets).at_offset(second);
        assert_eq!(
            Ok(domain("example.com.")),
            DomainName::deserialise(0, &mut buffer)
        );
    }

    #[test]
    fn rdlength_mismatch_is_rejected() {
        let response = referral(3, "example.com.", "example.com.", &["ns.example.net."]);
        let mut octets = response.to_octets().unwrap().to_vec();
        // the NS record's RDLENGTH sits just before its RDATA at the
        // end of the message: make it claim one more octet
        let rdata_len = "ns.example.net.".len() + 1;
        let rdlength_index = octets.len() - rdata_len - 2;
        octets[rdlength_index + 1] += 1;
        octets.push(0);

        assert_eq!(
            Err(Error::ResourceRecordInvalid(3)),
            Message::from_octets(&octets)
        );
    }
}
