//! UID FETCH command handler.
//!
//! Supports the items the gateway asks for: `FLAGS`, `RFC822.SIZE` and
//! `BODY[]` / `BODY.PEEK[]`. The message body travels as a counted
//! literal:
//!
//! ```text
//! * <seq> FETCH (UID <uid> BODY[] {<length>}
//! <exactly length bytes of raw RFC 2822 message>
//! )
//! ```
//!
//! Fetching `BODY[]` without `.PEEK` sets `\Seen`, as on a real server.

use crate::fake_imap::io::{write_bytes, write_line};
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Data items requested by a FETCH command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchItems {
    pub flags: bool,
    pub size: bool,
    pub body: bool,
    pub peek: bool,
}

impl FetchItems {
    pub fn from_line(line: &str) -> Self {
        let upper = line.to_ascii_uppercase();
        Self {
            flags: upper.contains("FLAGS"),
            size: upper.contains("RFC822.SIZE"),
            body: upper.contains("BODY"),
            peek: upper.contains("BODY.PEEK"),
        }
    }
}

/// Handle the UID FETCH command.
pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    items: FetchItems,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    // Render every response under the lock, write them afterwards.
    let rendered = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(folder_name).map(|folder| {
            let uids = folder.uids_in(sequence_set);
            let mut responses: Vec<(String, Option<Vec<u8>>)> = Vec::new();
            for (idx, email) in folder.emails.iter_mut().enumerate() {
                if !uids.contains(&email.uid) {
                    continue;
                }
                if items.body && !items.peek {
                    email.seen = true;
                }

                let mut head = format!("* {} FETCH (UID {}", idx + 1, email.uid);
                if items.flags {
                    head.push_str(&format!(" FLAGS ({})", email.flag_list()));
                }
                if items.size {
                    head.push_str(&format!(" RFC822.SIZE {}", email.raw.len()));
                }
                if items.body {
                    head.push_str(&format!(" BODY[] {{{}}}\r\n", email.raw.len()));
                    responses.push((head, Some(email.raw.clone())));
                } else {
                    head.push_str(")\r\n");
                    responses.push((head, None));
                }
            }
            responses
        })
    };
    let Some(responses) = rendered else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    for (head, literal) in responses {
        if write_line(stream, &head).await.is_err() {
            return;
        }
        if let Some(raw) = literal {
            if write_bytes(stream, &raw).await.is_err() {
                return;
            }
            if write_line(stream, ")\r\n").await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK FETCH completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::sequence::{SeqOrUid, Sequence};
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    const RAW: &[u8] = b"From: a@b.com\r\nSubject: Test\r\n\r\nBody";

    fn uid_set(uids: &[u32]) -> SequenceSet {
        SequenceSet(
            uids.iter()
                .map(|uid| Sequence::Single(SeqOrUid::Value(NonZeroU32::new(*uid).unwrap())))
                .collect::<Vec<_>>()
                .try_into()
                .unwrap(),
        )
    }

    fn mailbox() -> Mutex<Mailbox> {
        Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(4, true, RAW)
                .email(42, false, RAW)
                .build(),
        )
    }

    async fn run(
        line: &str,
        set: &SequenceSet,
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let items = FetchItems::from_line(line);
        handle_uid_fetch("A1", set, items, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn parses_requested_items() {
        let items = FetchItems::from_line("A3 UID FETCH 1,2 (FLAGS RFC822.SIZE)");
        assert!(items.flags && items.size && !items.body);
        let items = FetchItems::from_line("A4 UID FETCH 2 (BODY.PEEK[])");
        assert!(items.body && items.peek && !items.flags);
    }

    #[tokio::test]
    async fn summaries_carry_flags_and_size() {
        let mb = mailbox();
        let output = run("UID FETCH 4,42 (FLAGS RFC822.SIZE)", &uid_set(&[4, 42]), &mb, Some("INBOX")).await;

        let len = RAW.len();
        assert!(output.contains(&format!("* 1 FETCH (UID 4 FLAGS (\\Seen) RFC822.SIZE {len})\r\n")));
        assert!(output.contains(&format!("* 2 FETCH (UID 42 FLAGS () RFC822.SIZE {len})\r\n")));
        assert!(output.ends_with("A1 OK FETCH completed\r\n"));
    }

    #[tokio::test]
    async fn peek_leaves_message_unseen() {
        let mb = mailbox();
        let output = run("UID FETCH 42 (BODY.PEEK[])", &uid_set(&[42]), &mb, Some("INBOX")).await;

        assert!(output.contains(&format!("* 2 FETCH (UID 42 BODY[] {{{}}}\r\n", RAW.len())));
        assert!(output.contains("From: a@b.com"));
        assert!(!mb.lock().unwrap().get_folder("INBOX").unwrap().emails[1].seen);
    }

    #[tokio::test]
    async fn plain_body_fetch_marks_seen() {
        let mb = mailbox();
        run("UID FETCH 42 (BODY[])", &uid_set(&[42]), &mb, Some("INBOX")).await;
        assert!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails[1].seen);
    }

    #[tokio::test]
    async fn missing_uid_returns_only_ok() {
        let mb = mailbox();
        let output = run("UID FETCH 99 (FLAGS)", &uid_set(&[99]), &mb, Some("INBOX")).await;
        assert_eq!(output, "A1 OK FETCH completed\r\n");
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = mailbox();
        let output = run("UID FETCH 1 (FLAGS)", &uid_set(&[1]), &mb, None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }
}
