//! Decoders for the replication stream payloads: the outer XLogData /
//! keepalive frames and the pgoutput (protocol version 2) logical messages
//! inside them.

use crate::GatewayError;

/// Outer frame of a CopyData message on a replication connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationFrame {
    /// 'k', primary keepalive.
    PrimaryKeepalive {
        wal_end: u64,
        timestamp: i64,
        reply_requested: bool,
    },
    /// 'w', a chunk of WAL carrying one logical message.
    XLogData {
        wal_start: u64,
        server_wal_end: u64,
        timestamp: i64,
        data: Vec<u8>,
    },
}

pub fn parse_replication_frame(data: &[u8]) -> Result<ReplicationFrame, GatewayError> {
    let mut reader = Reader::new(data);

    match reader.u8()? {
        b'k' => Ok(ReplicationFrame::PrimaryKeepalive {
            wal_end: reader.u64()?,
            timestamp: reader.i64()?,
            reply_requested: reader.u8()? != 0,
        }),
        b'w' => Ok(ReplicationFrame::XLogData {
            wal_start: reader.u64()?,
            server_wal_end: reader.u64()?,
            timestamp: reader.i64()?,
            data: reader.rest().to_vec(),
        }),
        other => Err(GatewayError::Replication(format!(
            "unknown replication frame tag {other:#04x}"
        ))),
    }
}

/// A pgoutput logical message. Only the kinds the relay acts on are fully
/// decoded; everything else comes back as `Other` and is skipped upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalMessage {
    Begin {
        final_lsn: u64,
        commit_timestamp: i64,
        xid: u32,
    },
    Commit {
        commit_lsn: u64,
        end_lsn: u64,
        commit_timestamp: i64,
    },
    Relation(Relation),
    Insert {
        relation_id: u32,
        tuple: Vec<TupleValue>,
    },
    StreamStart {
        xid: u32,
    },
    StreamStop,
    Other(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationColumn {
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TupleValue {
    Null,
    /// Unchanged TOAST value, not shipped by the server.
    Toast,
    /// Text-format column data.
    Text(Vec<u8>),
}

/// Parse one logical message. `in_stream` must reflect whether the stream is
/// between StreamStart/StreamStop, because streamed messages carry an extra
/// xid prefix.
pub fn parse_logical_message(
    data: &[u8],
    in_stream: bool,
) -> Result<LogicalMessage, GatewayError> {
    let mut reader = Reader::new(data);

    match reader.u8()? {
        b'B' => Ok(LogicalMessage::Begin {
            final_lsn: reader.u64()?,
            commit_timestamp: reader.i64()?,
            xid: reader.u32()?,
        }),
        b'C' => {
            let _flags = reader.u8()?;
            Ok(LogicalMessage::Commit {
                commit_lsn: reader.u64()?,
                end_lsn: reader.u64()?,
                commit_timestamp: reader.i64()?,
            })
        }
        b'R' => {
            if in_stream {
                let _xid = reader.u32()?;
            }
            let id = reader.u32()?;
            let namespace = reader.cstr()?;
            let name = reader.cstr()?;
            let replica_identity = reader.u8()?;

            let column_count = reader.u16()?;
            let mut columns = Vec::with_capacity(usize::from(column_count));
            for _ in 0..column_count {
                columns.push(RelationColumn {
                    flags: reader.u8()?,
                    name: reader.cstr()?,
                    type_oid: reader.u32()?,
                    type_modifier: reader.i32()?,
                });
            }

            Ok(LogicalMessage::Relation(Relation {
                id,
                namespace,
                name,
                replica_identity,
                columns,
            }))
        }
        b'I' => {
            if in_stream {
                let _xid = reader.u32()?;
            }
            let relation_id = reader.u32()?;

            let marker = reader.u8()?;
            if marker != b'N' {
                return Err(GatewayError::Replication(format!(
                    "insert tuple marker {marker:#04x} is not 'N'"
                )));
            }

            Ok(LogicalMessage::Insert {
                relation_id,
                tuple: parse_tuple(&mut reader)?,
            })
        }
        b'S' => {
            let xid = reader.u32()?;
            let _first_segment = reader.u8()?;
            Ok(LogicalMessage::StreamStart { xid })
        }
        b'E' => Ok(LogicalMessage::StreamStop),
        other => Ok(LogicalMessage::Other(other)),
    }
}

fn parse_tuple(reader: &mut Reader<'_>) -> Result<Vec<TupleValue>, GatewayError> {
    let column_count = reader.u16()?;
    let mut values = Vec::with_capacity(usize::from(column_count));

    for _ in 0..column_count {
        match reader.u8()? {
            b'n' => values.push(TupleValue::Null),
            b'u' => values.push(TupleValue::Toast),
            b't' => {
                let len = reader.u32()? as usize;
                values.push(TupleValue::Text(reader.take(len)?.to_vec()));
            }
            other => {
                return Err(GatewayError::Replication(format!(
                    "unknown tuple column kind {other:#04x}"
                )));
            }
        }
    }

    Ok(values)
}

/// Bounds-checked cursor over a message body. Truncated input surfaces as a
/// replication error instead of a panic.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], GatewayError> {
        if self.buf.len() < n {
            return Err(GatewayError::Replication(
                "truncated replication message".into(),
            ));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, GatewayError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, GatewayError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, GatewayError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32, GatewayError> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> Result<u64, GatewayError> {
        let bytes = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(out))
    }

    fn i64(&mut self) -> Result<i64, GatewayError> {
        Ok(self.u64()? as i64)
    }

    fn cstr(&mut self) -> Result<String, GatewayError> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| GatewayError::Replication("unterminated string".into()))?;
        let value = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf = &self.buf[end + 1..];
        Ok(value)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_cstr(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }

    #[test]
    fn parses_primary_keepalive() {
        let mut frame = vec![b'k'];
        frame.extend_from_slice(&42u64.to_be_bytes());
        frame.extend_from_slice(&7i64.to_be_bytes());
        frame.push(1);

        assert_eq!(
            parse_replication_frame(&frame).unwrap(),
            ReplicationFrame::PrimaryKeepalive {
                wal_end: 42,
                timestamp: 7,
                reply_requested: true,
            }
        );
    }

    #[test]
    fn parses_xlogdata_envelope() {
        let mut frame = vec![b'w'];
        frame.extend_from_slice(&1u64.to_be_bytes());
        frame.extend_from_slice(&2u64.to_be_bytes());
        frame.extend_from_slice(&3i64.to_be_bytes());
        frame.extend_from_slice(b"payload");

        match parse_replication_frame(&frame).unwrap() {
            ReplicationFrame::XLogData {
                wal_start,
                server_wal_end,
                data,
                ..
            } => {
                assert_eq!(wal_start, 1);
                assert_eq!(server_wal_end, 2);
                assert_eq!(data, b"payload");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn parses_begin_message() {
        let mut msg = vec![b'B'];
        msg.extend_from_slice(&0xDEADu64.to_be_bytes());
        msg.extend_from_slice(&99i64.to_be_bytes());
        msg.extend_from_slice(&1234u32.to_be_bytes());

        assert_eq!(
            parse_logical_message(&msg, false).unwrap(),
            LogicalMessage::Begin {
                final_lsn: 0xDEAD,
                commit_timestamp: 99,
                xid: 1234,
            }
        );
    }

    #[test]
    fn parses_relation_message() {
        let mut msg = vec![b'R'];
        msg.extend_from_slice(&17u32.to_be_bytes());
        put_cstr(&mut msg, "public");
        put_cstr(&mut msg, "validation_job_outbox");
        msg.push(b'd');
        msg.extend_from_slice(&2u16.to_be_bytes());
        // column: id
        msg.push(1);
        put_cstr(&mut msg, "id");
        msg.extend_from_slice(&20u32.to_be_bytes());
        msg.extend_from_slice(&(-1i32).to_be_bytes());
        // column: payload
        msg.push(0);
        put_cstr(&mut msg, "payload");
        msg.extend_from_slice(&3802u32.to_be_bytes());
        msg.extend_from_slice(&(-1i32).to_be_bytes());

        let parsed = parse_logical_message(&msg, false).unwrap();
        let LogicalMessage::Relation(rel) = parsed else {
            panic!("expected relation");
        };

        assert_eq!(rel.id, 17);
        assert_eq!(rel.namespace, "public");
        assert_eq!(rel.name, "validation_job_outbox");
        assert_eq!(rel.columns.len(), 2);
        assert_eq!(rel.columns[0].name, "id");
        assert_eq!(rel.columns[1].name, "payload");
        assert_eq!(rel.columns[1].type_oid, 3802);
    }

    #[test]
    fn parses_insert_with_null_and_text_columns() {
        let mut msg = vec![b'I'];
        msg.extend_from_slice(&17u32.to_be_bytes());
        msg.push(b'N');
        msg.extend_from_slice(&3u16.to_be_bytes());
        msg.push(b't');
        msg.extend_from_slice(&2u32.to_be_bytes());
        msg.extend_from_slice(b"42");
        msg.push(b'n');
        msg.push(b't');
        msg.extend_from_slice(&2u32.to_be_bytes());
        msg.extend_from_slice(b"{}");

        assert_eq!(
            parse_logical_message(&msg, false).unwrap(),
            LogicalMessage::Insert {
                relation_id: 17,
                tuple: vec![
                    TupleValue::Text(b"42".to_vec()),
                    TupleValue::Null,
                    TupleValue::Text(b"{}".to_vec()),
                ],
            }
        );
    }

    #[test]
    fn streamed_insert_skips_the_xid_prefix() {
        let mut msg = vec![b'I'];
        msg.extend_from_slice(&777u32.to_be_bytes()); // xid
        msg.extend_from_slice(&17u32.to_be_bytes());
        msg.push(b'N');
        msg.extend_from_slice(&1u16.to_be_bytes());
        msg.push(b'n');

        assert_eq!(
            parse_logical_message(&msg, true).unwrap(),
            LogicalMessage::Insert {
                relation_id: 17,
                tuple: vec![TupleValue::Null],
            }
        );
    }

    #[test]
    fn unknown_message_kind_is_preserved_not_fatal() {
        let msg = vec![b'Y', 0, 0];
        assert_eq!(
            parse_logical_message(&msg, false).unwrap(),
            LogicalMessage::Other(b'Y')
        );
    }

    #[test]
    fn truncated_messages_error_out() {
        assert!(parse_logical_message(&[b'B', 0, 1], false).is_err());
        assert!(parse_replication_frame(&[b'k']).is_err());
        assert!(parse_replication_frame(&[]).is_err());
    }
}
