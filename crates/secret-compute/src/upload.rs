//! Result upload to the Coordination Server.

use secret_common::{CoordinatorMessage, Frame, SenderId, EOF_SENTINEL};

/// `Output` frames carrying `lines`, followed by the `EndOfOutput` sentinel.
///
/// Lines are newline-joined and cut into payloads of at most `max_payload`
/// bytes. A single longer line travels alone.
pub fn output_frames(sender: &SenderId, lines: &[String], max_payload: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut chunk = String::new();

    for line in lines {
        if !chunk.is_empty() && chunk.len() + 1 + line.len() > max_payload {
            frames.push(Frame::new(
                sender.clone(),
                CoordinatorMessage::Output,
                std::mem::take(&mut chunk),
            ));
        }
        if !chunk.is_empty() {
            chunk.push('\n');
        }
        chunk.push_str(line);
    }
    if !chunk.is_empty() {
        frames.push(Frame::new(sender.clone(), CoordinatorMessage::Output, chunk));
    }

    frames.push(Frame::new(
        sender.clone(),
        CoordinatorMessage::EndOfOutput,
        EOF_SENTINEL,
    ));
    frames
}
