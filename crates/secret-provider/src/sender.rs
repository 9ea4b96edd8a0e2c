//! Streaming of a shard queue to its Compute Node.

use secret_common::transport::FramePacker;
use secret_common::{ComputeMessage, Frame, SenderId};

/// `Data` frames for `records`, in order, followed by `EndOfData` carrying
/// the number of data frames.
pub fn data_frames(
    sender: &SenderId,
    records: Vec<String>,
    max_frame_payload: usize,
) -> Vec<Frame> {
    let mut frames: Vec<Frame> = FramePacker::pack(max_frame_payload, records)
        .into_iter()
        .map(|block| Frame::new(sender.clone(), ComputeMessage::Data, block.encode()))
        .collect();

    let count = frames.len();
    frames.push(Frame::new(
        sender.clone(),
        ComputeMessage::EndOfData,
        count.to_string(),
    ));
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use secret_common::transport::DataFrame;

    #[test]
    fn test_data_frames_end_with_count() {
        let sender = SenderId::new("dpi1").unwrap();
        let records: Vec<String> =
            (0..100).map(|i| format!("1:{}\t{}", i, "v".repeat(30))).collect();

        let frames = data_frames(&sender, records.clone(), 512);
        let (last, data) = frames.split_last().unwrap();
        assert!(data.len() >= 2);
        assert_eq!(last.kind::<ComputeMessage>().unwrap(), ComputeMessage::EndOfData);
        assert_eq!(last.text().unwrap(), data.len().to_string());

        let rebuilt: Vec<String> = data
            .iter()
            .flat_map(|f| DataFrame::decode(&f.payload).unwrap().records)
            .collect();
        assert_eq!(rebuilt, records);
    }

    #[test]
    fn test_empty_shard_sends_zero_count() {
        let sender = SenderId::new("dpi1").unwrap();
        let frames = data_frames(&sender, Vec::new(), 512);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].text().unwrap(), "0");
    }
}
