//! Manual line editing for raw SSH channels.
//!
//! The bastion serves a byte stream, not a terminal device, so it does
//! its own echo and backspace handling. The readers are generic over
//! any byte source/sink, which keeps them unit-testable with in-memory
//! buffers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// What a read returned: a finished line, or a ^C that cancelled it.
#[derive(Debug, PartialEq, Eq)]
pub enum LineInput {
    Line(String),
    Interrupted,
}

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7f;

fn is_printable(byte: u8) -> bool {
    (0x20..0x7f).contains(&byte)
}

/// Read one line, echoing printable characters back to the client.
///
/// Backspace erases on screen, ^C cancels the line, ^D on an empty line
/// is taken as an `exit` request, other control bytes are ignored.
pub async fn read_line<R, W>(input: &mut R, echo: &mut W) -> std::io::Result<LineInput>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line: Vec<u8> = Vec::new();

    loop {
        let byte = input.read_u8().await?;
        match byte {
            b'\r' | b'\n' => {
                echo.write_all(b"\r\n").await?;
                return Ok(LineInput::Line(String::from_utf8_lossy(&line).into_owned()));
            }
            BACKSPACE | DEL => {
                if line.pop().is_some() {
                    // Erase the character on screen.
                    echo.write_all(b"\x08 \x08").await?;
                }
            }
            CTRL_C => {
                echo.write_all(b"^C\r\n").await?;
                return Ok(LineInput::Interrupted);
            }
            CTRL_D => {
                if line.is_empty() {
                    return Ok(LineInput::Line("exit".to_string()));
                }
            }
            b if is_printable(b) => {
                line.push(b);
                echo.write_all(&[b]).await?;
            }
            _ => {}
        }
    }
}

/// Read a secret with echo suppressed.
///
/// A backslash followed by `!`, `$`, a backtick, `"` or another
/// backslash contributes only the second byte. This keeps secrets with
/// shell-meta characters intact when clients type them through a shell
/// that required escaping.
pub async fn read_secret<R>(input: &mut R) -> std::io::Result<LineInput>
where
    R: AsyncRead + Unpin,
{
    let mut secret: Vec<u8> = Vec::new();
    let mut pending_backslash = false;

    loop {
        let byte = input.read_u8().await?;
        match byte {
            b'\r' | b'\n' => {
                return Ok(LineInput::Line(
                    String::from_utf8_lossy(&secret).into_owned(),
                ));
            }
            BACKSPACE | DEL => {
                if pending_backslash {
                    pending_backslash = false;
                } else {
                    secret.pop();
                }
            }
            CTRL_C => return Ok(LineInput::Interrupted),
            b'\\' => {
                if pending_backslash {
                    secret.push(b'\\');
                    pending_backslash = false;
                } else {
                    pending_backslash = true;
                }
            }
            b if is_printable(b) => {
                if pending_backslash {
                    if matches!(b, b'!' | b'$' | b'`' | b'"') {
                        secret.push(b);
                    } else {
                        secret.push(b'\\');
                        secret.push(b);
                    }
                    pending_backslash = false;
                } else {
                    secret.push(b);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn line(bytes: &[u8]) -> (LineInput, String) {
        let mut input = bytes;
        let mut echo = Cursor::new(Vec::new());
        let result = read_line(&mut input, &mut echo).await.unwrap();
        (result, String::from_utf8(echo.into_inner()).unwrap())
    }

    async fn secret(bytes: &[u8]) -> LineInput {
        let mut input = bytes;
        read_secret(&mut input).await.unwrap()
    }

    #[tokio::test]
    async fn plain_line_is_echoed() {
        let (result, echo) = line(b"list\r").await;
        assert_eq!(result, LineInput::Line("list".to_string()));
        assert_eq!(echo, "list\r\n");
    }

    #[tokio::test]
    async fn backspace_edits_the_line() {
        let (result, echo) = line(b"lisr\x7ft\r").await;
        assert_eq!(result, LineInput::Line("list".to_string()));
        assert!(echo.contains("\x08 \x08"));
    }

    #[tokio::test]
    async fn backspace_on_empty_line_does_nothing() {
        let (result, echo) = line(b"\x7fok\r").await;
        assert_eq!(result, LineInput::Line("ok".to_string()));
        assert!(!echo.contains('\x08'));
    }

    #[tokio::test]
    async fn ctrl_c_interrupts() {
        let (result, echo) = line(b"ss\x03").await;
        assert_eq!(result, LineInput::Interrupted);
        assert!(echo.ends_with("^C\r\n"));
    }

    #[tokio::test]
    async fn ctrl_d_on_empty_line_is_exit() {
        let (result, _) = line(b"\x04").await;
        assert_eq!(result, LineInput::Line("exit".to_string()));
    }

    #[tokio::test]
    async fn ctrl_d_mid_line_is_ignored() {
        let (result, _) = line(b"ab\x04c\r").await;
        assert_eq!(result, LineInput::Line("abc".to_string()));
    }

    #[tokio::test]
    async fn other_control_bytes_are_ignored() {
        let (result, echo) = line(b"a\x1b[Ab\r").await;
        // ESC is dropped; the bracketed sequence is printable and kept.
        assert_eq!(result, LineInput::Line("a[Ab".to_string()));
        assert_eq!(echo, "a[Ab\r\n");
    }

    #[tokio::test]
    async fn closed_input_is_an_error() {
        let mut input: &[u8] = b"partial";
        let mut echo = Cursor::new(Vec::new());
        assert!(read_line(&mut input, &mut echo).await.is_err());
    }

    #[tokio::test]
    async fn secret_is_read_without_echo() {
        assert_eq!(secret(b"hunter2\r").await, LineInput::Line("hunter2".into()));
    }

    #[tokio::test]
    async fn secret_backspace_edits() {
        assert_eq!(secret(b"abx\x7fc\r").await, LineInput::Line("abc".into()));
    }

    #[tokio::test]
    async fn secret_ctrl_c_interrupts() {
        assert_eq!(secret(b"ab\x03").await, LineInput::Interrupted);
    }

    #[tokio::test]
    async fn escaped_meta_characters_keep_only_the_second_byte() {
        assert_eq!(secret(b"a\\!b\r").await, LineInput::Line("a!b".into()));
        assert_eq!(secret(b"\\$x\r").await, LineInput::Line("$x".into()));
        assert_eq!(secret(b"\\\"q\r").await, LineInput::Line("\"q".into()));
        assert_eq!(secret(b"\\`t\r").await, LineInput::Line("`t".into()));
    }

    #[tokio::test]
    async fn escaped_backslash_is_one_backslash() {
        assert_eq!(secret(b"a\\\\b\r").await, LineInput::Line("a\\b".into()));
    }

    #[tokio::test]
    async fn backslash_before_ordinary_byte_is_literal() {
        assert_eq!(secret(b"a\\zb\r").await, LineInput::Line("a\\zb".into()));
    }

    #[tokio::test]
    async fn dangling_backslash_at_enter_is_dropped() {
        assert_eq!(secret(b"ab\\\r").await, LineInput::Line("ab".into()));
    }
}
