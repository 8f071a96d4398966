//! UID STORE command handler.
//!
//! `+FLAGS`, `-FLAGS` and `FLAGS` on `\Seen` and `\Deleted`; other flags
//! are ignored. Unless the client asked for `.SILENT`, every touched
//! message is echoed as `* N FETCH (UID u FLAGS (...))`.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Parsed STORE command arguments.
pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

fn apply(current: bool, wanted: bool, kind: &StoreType) -> bool {
    match kind {
        StoreType::Add => current || wanted,
        StoreType::Remove => current && !wanted,
        StoreType::Replace => wanted,
    }
}

/// Handle the UID STORE command.
pub async fn handle_uid_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let seen = args.flags.iter().any(|f| matches!(f, Flag::Seen));
    let deleted = args.flags.iter().any(|f| matches!(f, Flag::Deleted));

    // Mutate under the lock, write outside it.
    let updated = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(folder_name).map(|folder| {
            let uids = folder.uids_in(args.sequence_set);
            folder
                .emails
                .iter_mut()
                .enumerate()
                .filter(|(_, e)| uids.contains(&e.uid))
                .map(|(idx, email)| {
                    email.seen = apply(email.seen, seen, args.kind);
                    email.deleted = apply(email.deleted, deleted, args.kind);
                    format!(
                        "* {} FETCH (UID {} FLAGS ({}))\r\n",
                        idx + 1,
                        email.uid,
                        email.flag_list()
                    )
                })
                .collect::<Vec<_>>()
        })
    };
    let Some(lines) = updated else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    if !matches!(args.response, StoreResponse::Silent) {
        for line in &lines {
            if write_line(stream, line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
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
                .email(1, false, RAW)
                .email(2, true, RAW)
                .email(3, false, RAW)
                .build(),
        )
    }

    fn seen(mb: &Mutex<Mailbox>) -> Vec<bool> {
        let mb = mb.lock().unwrap();
        mb.get_folder("INBOX")
            .unwrap()
            .emails
            .iter()
            .map(|e| e.seen)
            .collect()
    }

    async fn run_store(
        set: &SequenceSet,
        kind: &StoreType,
        response: &StoreResponse,
        flags: &[Flag<'_>],
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let args = StoreArgs {
            sequence_set: set,
            kind,
            response,
            flags,
        };
        handle_uid_store("A1", &args, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn silent_add_seen_on_a_batch() {
        let mb = mailbox();
        let output = run_store(
            &uid_set(&[1, 3]),
            &StoreType::Add,
            &StoreResponse::Silent,
            &[Flag::Seen],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert_eq!(output, "A1 OK STORE completed\r\n");
        assert_eq!(seen(&mb), vec![true, true, true]);
    }

    #[tokio::test]
    async fn answer_echoes_flags() {
        let mb = mailbox();
        let output = run_store(
            &uid_set(&[2]),
            &StoreType::Add,
            &StoreResponse::Answer,
            &[Flag::Deleted],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(output.contains("* 2 FETCH (UID 2 FLAGS (\\Seen \\Deleted))"));
    }

    #[tokio::test]
    async fn remove_seen_flag() {
        let mb = mailbox();
        run_store(
            &uid_set(&[2]),
            &StoreType::Remove,
            &StoreResponse::Answer,
            &[Flag::Seen],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert_eq!(seen(&mb), vec![false, false, false]);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = mailbox();
        let output = run_store(
            &uid_set(&[1]),
            &StoreType::Add,
            &StoreResponse::Answer,
            &[Flag::Seen],
            &mb,
            None,
        )
        .await;

        assert!(output.contains("A1 BAD No folder selected"));
    }
}
