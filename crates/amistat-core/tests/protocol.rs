use amistat_core::protocol::{
    encode_frame, Channel, Command, DecoderState, Frame, FrameDecoder, ProtocolError, END, ESC,
    ESC_END, ESC_ESC,
};
use pretty_assertions::assert_eq;

#[test]
fn test_round_trip_with_reserved_bytes() {
    let payload = vec![0x01, END, 0x02, ESC, ESC, END, 0x7F];
    let bytes = encode_frame(Channel::Binary, &payload);

    let frames = FrameDecoder::new().feed(&bytes);
    assert_eq!(frames, vec![Frame::new(Channel::Binary, payload)]);
}

#[test]
fn test_encoded_frame_layout() {
    let bytes = encode_frame(Channel::Command, &[END, ESC, b'x']);
    assert_eq!(
        bytes,
        vec![END, b'A', ESC, ESC_END, ESC, ESC_ESC, b'x', END]
    );
    // Only the delimiters are bare END bytes
    assert_eq!(bytes.iter().filter(|&&b| b == END).count(), 2);
}

#[test]
fn test_empty_payload_frames() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(&[END, b'H', END]);
    assert_eq!(frames, vec![Frame::new(Channel::Heartbeat, vec![])]);
    assert_eq!(decoder.state(), DecoderState::WaitForStart);
}

#[test]
fn test_every_channel_survives_encoding() {
    let mut decoder = FrameDecoder::new();
    for channel in Channel::ALL {
        let frames = decoder.feed(&encode_frame(channel, b"{}"));
        assert_eq!(frames.len(), 1, "channel {}", channel);
        assert_eq!(frames[0].channel, channel);
    }
}

#[test]
fn test_byte_at_a_time_matches_batch() {
    let mut stream = Vec::new();
    stream.extend(encode_frame(Channel::Debug, b"boot ok"));
    stream.extend(encode_frame(Channel::Command, &[ESC, 0x00, END]));
    stream.extend([END, b'H', END]);

    let batch = FrameDecoder::new().feed(&stream);

    let mut decoder = FrameDecoder::new();
    let single: Vec<Frame> = stream.iter().filter_map(|&b| decoder.push(b)).collect();

    assert_eq!(batch, single);
    assert_eq!(batch.len(), 3);
}

#[test]
fn test_decoder_recovers_after_invalid_escape() {
    let mut decoder = FrameDecoder::new();
    let mut stream = vec![END, b'A', b'{', ESC, b'q', b'}', END];
    stream.extend(encode_frame(Channel::Command, br#"{"ID":"x"}"#));

    let frames = decoder.feed(&stream);
    assert_eq!(decoder.framing_errors(), 1);
    // The damaged frame keeps its surrounding bytes; the next one is intact
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, b"{}".to_vec());
    assert_eq!(frames[1].text(), r#"{"ID":"x"}"#);
}

#[test]
fn test_command_frames_carry_json() {
    let frame = Command::SetAcPower(true).to_frame();
    assert_eq!(frame.channel, Channel::Command);

    let value: serde_json::Value = serde_json::from_str(&frame.text()).unwrap();
    assert_eq!(value["ID"], "SetVariable");
    assert_eq!(value["Content"]["Name"], "AC_POWER_EN");
    assert_eq!(value["Content"]["Value"], "1");
}

#[test]
fn test_protocol_error_classification() {
    assert!(ProtocolError::MalformedFrame("x".into()).is_malformed());
    assert!(ProtocolError::MissingField("Content").is_malformed());
    assert!(!ProtocolError::NotOpen.is_malformed());
    assert!(!ProtocolError::AlreadyOpen.is_malformed());
    assert_eq!(
        ProtocolError::PortNotFound("COM9".into()).to_string(),
        "Port not found: COM9"
    );
}
