//! Framing and strict decoding of one session's message stream.
//!
//! Each message is a 4-byte little-endian length followed by that many
//! bytes of UTF-8.

use std::io::{ErrorKind, Read, Write};

use nestbox_common::constants::MAX_MESSAGE_LEN;

use super::ProtocolError;
use super::tag::{Tag, is_reserved};

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A reserved sentinel.
    Tag(Tag),
    /// A plain argument.
    Argument(String),
}

impl Message {
    fn describe(&self) -> String {
        match self {
            Self::Tag(tag) => format!("tag {tag}"),
            Self::Argument(arg) => format!("argument {arg:?}"),
        }
    }
}

/// A framed, strictly-decoded message stream over one connection.
#[derive(Debug)]
pub struct Session<S> {
    stream: S,
}

impl<S: Read + Write> Session<S> {
    /// Wraps an established connection.
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Returns the underlying connection.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn read_frame(&mut self) -> Result<String, ProtocolError> {
        let mut len_buf = [0u8; 4];
        read_exact_or_disconnect(&mut self.stream, &mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(ProtocolError::Oversized {
                len,
                max: MAX_MESSAGE_LEN,
            });
        }
        let mut body = vec![0u8; len];
        read_exact_or_disconnect(&mut self.stream, &mut body)?;
        String::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn write_frame(&mut self, body: &str) -> Result<(), ProtocolError> {
        if body.len() > MAX_MESSAGE_LEN {
            return Err(ProtocolError::Oversized {
                len: body.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        let len = u32::try_from(body.len()).map_err(|_| ProtocolError::Oversized {
            len: body.len(),
            max: MAX_MESSAGE_LEN,
        })?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(body.as_bytes());
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads the next message and classifies it.
    ///
    /// # Errors
    ///
    /// Fails on disconnect, framing violations, or an unknown sentinel.
    pub fn read_message(&mut self) -> Result<Message, ProtocolError> {
        let raw = self.read_frame()?;
        if is_reserved(&raw) {
            return Tag::from_wire(&raw)
                .map(Message::Tag)
                .ok_or_else(|| ProtocolError::UnknownTag(raw.trim_start_matches('\0').to_string()));
        }
        Ok(Message::Argument(raw))
    }

    /// Reads the tag that opens a session.
    ///
    /// # Errors
    ///
    /// Fails if the message is not a command tag.
    pub fn read_command(&mut self) -> Result<Tag, ProtocolError> {
        match self.read_message()? {
            Message::Tag(tag) if tag.is_command() => Ok(tag),
            other => Err(ProtocolError::Unexpected {
                expected: "a command".into(),
                got: other.describe(),
            }),
        }
    }

    /// Reads any tag.
    ///
    /// # Errors
    ///
    /// Fails if the next message is a plain argument.
    pub fn read_tag(&mut self) -> Result<Tag, ProtocolError> {
        match self.read_message()? {
            Message::Tag(tag) => Ok(tag),
            other => Err(ProtocolError::Unexpected {
                expected: "a tag".into(),
                got: other.describe(),
            }),
        }
    }

    /// Reads a tag and checks that it is `expected`.
    ///
    /// # Errors
    ///
    /// Fails if anything other than `expected` arrives.
    pub fn expect_tag(&mut self, expected: Tag) -> Result<(), ProtocolError> {
        match self.read_message()? {
            Message::Tag(tag) if tag == expected => Ok(()),
            other => Err(ProtocolError::Unexpected {
                expected: format!("tag {expected}"),
                got: other.describe(),
            }),
        }
    }

    /// Reads one plain argument.
    ///
    /// # Errors
    ///
    /// Fails if a tag arrives instead.
    pub fn read_argument(&mut self) -> Result<String, ProtocolError> {
        match self.read_message()? {
            Message::Argument(arg) => Ok(arg),
            other => Err(ProtocolError::Unexpected {
                expected: "an argument".into(),
                got: other.describe(),
            }),
        }
    }

    /// Reads arguments up to and including `end`.
    ///
    /// # Errors
    ///
    /// Fails on disconnect before `end`, or if any other tag interrupts
    /// the list.
    pub fn read_list(&mut self, end: Tag) -> Result<Vec<String>, ProtocolError> {
        let mut items = Vec::new();
        loop {
            match self.read_message()? {
                Message::Tag(tag) if tag == end => return Ok(items),
                Message::Argument(arg) => items.push(arg),
                Message::Tag(other) => {
                    return Err(ProtocolError::Unexpected {
                        expected: format!("argument or tag {end}"),
                        got: format!("tag {other}"),
                    });
                }
            }
        }
    }

    /// Reads a list delimited by `open` and `end`.
    ///
    /// # Errors
    ///
    /// Fails if `open` is missing or the list is malformed.
    pub fn read_section(&mut self, open: Tag, end: Tag) -> Result<Vec<String>, ProtocolError> {
        self.expect_tag(open)?;
        self.read_list(end)
    }

    /// Reads a flag encoded as one of two sentinels.
    ///
    /// # Errors
    ///
    /// Fails if neither sentinel arrives.
    pub fn read_flag(&mut self, on: Tag, off: Tag) -> Result<bool, ProtocolError> {
        match self.read_message()? {
            Message::Tag(tag) if tag == on => Ok(true),
            Message::Tag(tag) if tag == off => Ok(false),
            other => Err(ProtocolError::Unexpected {
                expected: format!("tag {on} or {off}"),
                got: other.describe(),
            }),
        }
    }

    /// Sends a sentinel.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be written.
    pub fn send_tag(&mut self, tag: Tag) -> Result<(), ProtocolError> {
        self.write_frame(tag.as_wire())
    }

    /// Sends a plain argument.
    ///
    /// # Errors
    ///
    /// Fails if the argument starts with the sentinel prefix, is too long,
    /// or the connection cannot be written.
    pub fn send_argument(&mut self, arg: &str) -> Result<(), ProtocolError> {
        if is_reserved(arg) {
            return Err(ProtocolError::InvalidArgument {
                field: "argument",
                reason: "starts with the reserved NUL prefix".into(),
            });
        }
        self.write_frame(arg)
    }

    /// Sends each item as an argument, then `end`.
    ///
    /// # Errors
    ///
    /// Fails if any item cannot be sent.
    pub fn send_list<I, T>(&mut self, items: I, end: Tag) -> Result<(), ProtocolError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for item in items {
            self.send_argument(item.as_ref())?;
        }
        self.send_tag(end)
    }

    /// Sends `open`, the items, then `end`.
    ///
    /// # Errors
    ///
    /// Fails if any part cannot be sent.
    pub fn send_section<I, T>(&mut self, open: Tag, items: I, end: Tag) -> Result<(), ProtocolError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.send_tag(open)?;
        self.send_list(items, end)
    }

    /// Sends a flag as one of two sentinels.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be written.
    pub fn send_flag(&mut self, value: bool, on: Tag, off: Tag) -> Result<(), ProtocolError> {
        self.send_tag(if value { on } else { off })
    }
}

fn read_exact_or_disconnect<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ProtocolError::Disconnected,
        _ => ProtocolError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// In-memory duplex: reads from `input`, writes into `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Encodes what a peer would have sent.
    fn peer_sends(messages: &[&str]) -> Session<Duplex> {
        let mut writer = Session::new(Duplex {
            input: Cursor::new(Vec::new()),
            output: Vec::new(),
        });
        for m in messages {
            writer.write_frame(m).unwrap();
        }
        Session::new(Duplex {
            input: Cursor::new(writer.into_inner().output),
            output: Vec::new(),
        })
    }

    #[test]
    fn reads_command_then_list() {
        let mut s = peer_sends(&[
            Tag::Create.as_wire(),
            "/c1",
            Tag::InitCommand.as_wire(),
            "/bin/echo",
            "hi",
            Tag::EndInitCommand.as_wire(),
        ]);
        assert_eq!(s.read_command().unwrap(), Tag::Create);
        assert_eq!(s.read_argument().unwrap(), "/c1");
        let argv = s.read_section(Tag::InitCommand, Tag::EndInitCommand).unwrap();
        assert_eq!(argv, vec!["/bin/echo", "hi"]);
    }

    #[test]
    fn empty_list_needs_its_terminator() {
        let mut s = peer_sends(&[Tag::EndEnvironment.as_wire()]);
        assert!(s.read_list(Tag::EndEnvironment).unwrap().is_empty());
    }

    #[test]
    fn disconnect_mid_list_is_an_error_not_an_empty_list() {
        let mut s = peer_sends(&["A=1", "B=2"]);
        assert!(matches!(
            s.read_list(Tag::EndEnvironment),
            Err(ProtocolError::Disconnected)
        ));
    }

    #[test]
    fn foreign_tag_inside_list_is_rejected() {
        let mut s = peer_sends(&["A=1", Tag::EndMounts.as_wire()]);
        assert!(matches!(
            s.read_list(Tag::EndEnvironment),
            Err(ProtocolError::Unexpected { .. })
        ));
    }

    #[test]
    fn argument_where_command_expected_is_rejected() {
        let mut s = peer_sends(&["hello"]);
        assert!(matches!(s.read_command(), Err(ProtocolError::Unexpected { .. })));
    }

    #[test]
    fn reply_tag_cannot_open_a_session() {
        let mut s = peer_sends(&[Tag::Killed.as_wire()]);
        assert!(matches!(s.read_command(), Err(ProtocolError::Unexpected { .. })));
    }

    #[test]
    fn unknown_sentinel_is_reported() {
        let mut s = peer_sends(&["\0bogus"]);
        match s.read_command() {
            Err(ProtocolError::UnknownTag(name)) => assert_eq!(name, "bogus"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn oversized_frame_is_refused_before_allocation() {
        let mut bytes = u32::try_from(MAX_MESSAGE_LEN + 1).unwrap().to_le_bytes().to_vec();
        bytes.extend_from_slice(b"x");
        let mut s = Session::new(Duplex {
            input: Cursor::new(bytes),
            output: Vec::new(),
        });
        assert!(matches!(s.read_message(), Err(ProtocolError::Oversized { .. })));
    }

    #[test]
    fn truncated_frame_body_is_a_disconnect() {
        let mut bytes = 10u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut s = Session::new(Duplex {
            input: Cursor::new(bytes),
            output: Vec::new(),
        });
        assert!(matches!(s.read_message(), Err(ProtocolError::Disconnected)));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut bytes = 2u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let mut s = Session::new(Duplex {
            input: Cursor::new(bytes),
            output: Vec::new(),
        });
        assert!(matches!(s.read_message(), Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn flags_decode_both_ways() {
        let mut s = peer_sends(&[Tag::SeccompOff.as_wire(), Tag::NoNewPrivsOn.as_wire()]);
        assert!(!s.read_flag(Tag::SeccompOn, Tag::SeccompOff).unwrap());
        assert!(s.read_flag(Tag::NoNewPrivsOn, Tag::NoNewPrivsOff).unwrap());
    }

    #[test]
    fn sending_reserved_argument_is_refused() {
        let mut s = peer_sends(&[]);
        assert!(s.send_argument("\0sneaky").is_err());
        assert!(s.into_inner().output.is_empty());
    }

    #[test]
    fn send_section_frames_every_item() {
        let mut s = peer_sends(&[]);
        s.send_section(Tag::Environment, ["A=1", "B=2"], Tag::EndEnvironment)
            .unwrap();
        let written = s.into_inner().output;

        let mut reader = Session::new(Duplex {
            input: Cursor::new(written),
            output: Vec::new(),
        });
        assert_eq!(
            reader.read_section(Tag::Environment, Tag::EndEnvironment).unwrap(),
            vec!["A=1", "B=2"]
        );
    }
}
