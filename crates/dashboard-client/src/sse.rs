/// Incremental decoder for `data: <json>\n\n` framed event records.
///
/// Chunks arrive at arbitrary byte boundaries; a record is surfaced only
/// after its blank-line terminator has been seen in full. Decoding a
/// record before its terminator arrives would hand half a JSON document
/// to the parser, so the buffer holds partial records across pushes.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw transport chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete record payload, if one has fully arrived.
    ///
    /// `data:` field prefixes are stripped; a record with several data
    /// lines yields them joined with newlines. Comment/heartbeat records
    /// (no data field) are consumed silently.
    pub fn next_record(&mut self) -> Option<String> {
        loop {
            let end = find_delimiter(&self.buffer)?;
            let record: Vec<u8> = self.buffer.drain(..end + 2).take(end).collect();
            // UTF-8 is only decoded per complete record, so a multi-byte
            // character split across chunks never reaches the parser.
            let text = String::from_utf8_lossy(&record);

            let mut payload = String::new();
            for line in text.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    if !payload.is_empty() {
                        payload.push('\n');
                    }
                    payload.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }

            if !payload.is_empty() {
                return Some(payload);
            }
        }
    }

    /// Bytes of a record still waiting for its terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_record_in_one_chunk() {
        let mut decoder = SseFrameDecoder::new();
        decoder.push(b"data: {\"type\":\"complete\"}\n\n");
        assert_eq!(
            decoder.next_record().as_deref(),
            Some("{\"type\":\"complete\"}")
        );
        assert_eq!(decoder.next_record(), None);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn record_split_across_chunks_is_buffered() {
        let mut decoder = SseFrameDecoder::new();
        decoder.push(b"data: {\"type\":\"ba");
        assert_eq!(decoder.next_record(), None);

        decoder.push(b"sic\",\"data\":{}}\n");
        assert_eq!(decoder.next_record(), None);

        decoder.push(b"\ndata: {\"type\":\"complete\"}\n\n");
        assert_eq!(
            decoder.next_record().as_deref(),
            Some("{\"type\":\"basic\",\"data\":{}}")
        );
        assert_eq!(
            decoder.next_record().as_deref(),
            Some("{\"type\":\"complete\"}")
        );
        assert_eq!(decoder.next_record(), None);
    }

    #[test]
    fn several_records_in_one_chunk() {
        let mut decoder = SseFrameDecoder::new();
        decoder.push(b"data: one\n\ndata: two\n\ndata: thr");
        assert_eq!(decoder.next_record().as_deref(), Some("one"));
        assert_eq!(decoder.next_record().as_deref(), Some("two"));
        assert_eq!(decoder.next_record(), None);
        assert!(decoder.pending_len() > 0);
    }

    #[test]
    fn heartbeat_records_are_skipped() {
        let mut decoder = SseFrameDecoder::new();
        decoder.push(b": keep-alive\n\ndata: payload\n\n");
        assert_eq!(decoder.next_record().as_deref(), Some("payload"));
    }

    #[test]
    fn multi_line_data_joins_with_newlines() {
        let mut decoder = SseFrameDecoder::new();
        decoder.push(b"data: first\ndata: second\n\n");
        assert_eq!(decoder.next_record().as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn multibyte_utf8_split_across_chunks() {
        let mut decoder = SseFrameDecoder::new();
        let record = "data: {\"name\":\"삼성전자\"}\n\n".as_bytes();
        // Split inside the first multi-byte character.
        let (head, tail) = record.split_at(17);
        decoder.push(head);
        assert_eq!(decoder.next_record(), None);
        decoder.push(tail);
        assert_eq!(
            decoder.next_record().as_deref(),
            Some("{\"name\":\"삼성전자\"}")
        );
    }
}
