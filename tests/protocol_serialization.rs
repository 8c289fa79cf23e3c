use serde_json::json;
use voicewire::protocol::{convai, gemini, realtime};

#[test]
fn realtime_server_events_decode_by_type_tag() {
    let cases = [
        (r#"{"type":"session.created","event_id":"e1","session":{}}"#, "session"),
        (
            r#"{"type":"input_audio_buffer.speech_started","event_id":"e2","audio_start_ms":120,"item_id":"i"}"#,
            "speech",
        ),
        (
            r#"{"type":"response.function_call_arguments.done","event_id":"e3","response_id":"r","item_id":"i","output_index":0,"call_id":"c1","name":"get_time","arguments":"{}"}"#,
            "tool",
        ),
    ];
    for (frame, label) in cases {
        let event: realtime::ServerEvent = serde_json::from_str(frame).unwrap();
        assert!(
            !matches!(event, realtime::ServerEvent::Unknown(_)),
            "{label} frame fell through to Unknown"
        );
    }
}

#[test]
fn realtime_error_frame_carries_retryability() {
    let frame = r#"{"type":"error","event_id":"e1","error":{"type":"rate_limit_error","code":"rl","message":"slow down","event_id":null}}"#;
    let event: realtime::ServerEvent = serde_json::from_str(frame).unwrap();
    match event {
        realtime::ServerEvent::Error { error, .. } => assert!(error.is_retryable()),
        other => panic!("unexpected event: {other:?}"),
    }

    let frame = r#"{"type":"error","event_id":"e2","error":{"type":"authentication_error","code":null,"message":"bad key","event_id":null}}"#;
    let event: realtime::ServerEvent = serde_json::from_str(frame).unwrap();
    match event {
        realtime::ServerEvent::Error { error, .. } => assert!(!error.is_retryable()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn gemini_server_message_sections_decode() {
    let frame = json!({
        "serverContent": {
            "modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAECAwQ="}},
            ]},
            "outputTranscription": {"text": "hello there", "finished": true},
            "turnComplete": true
        }
    })
    .to_string();
    let message: gemini::ServerMessage = serde_json::from_str(&frame).unwrap();
    let content = message.server_content.unwrap();
    assert_eq!(content.turn_complete, Some(true));
    assert_eq!(
        content.output_transcription.unwrap().text.as_deref(),
        Some("hello there")
    );
    let parts = content.model_turn.unwrap().parts;
    assert_eq!(parts[0].inline_data.as_ref().unwrap().data, "AAECAwQ=");
}

#[test]
fn gemini_tool_call_frame_decodes() {
    let frame = json!({
        "toolCall": {"functionCalls": [
            {"id": "fc_1", "name": "get_weather", "args": {"city": "Oslo"}}
        ]}
    })
    .to_string();
    let message: gemini::ServerMessage = serde_json::from_str(&frame).unwrap();
    let calls = message.tool_call.unwrap().function_calls;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "get_weather");
    assert_eq!(calls[0].id.as_deref(), Some("fc_1"));
}

#[test]
fn code_call_parser_normalizes_the_textual_encoding() {
    let (name, args) =
        gemini::parse_code_call("default_api.set_led(color='red', brightness=0.5, on=True)")
            .unwrap();
    assert_eq!(name, "set_led");
    assert_eq!(args["color"], "red");
    assert_eq!(args["brightness"], 0.5);
    assert_eq!(args["on"], true);

    assert!(gemini::parse_code_call("no parens here").is_none());
}

#[test]
fn convai_frames_decode_by_type_tag() {
    let frame = r#"{"type":"audio","audio_event":{"audio_base_64":"AQID","event_id":3}}"#;
    let event: convai::ServerEvent = serde_json::from_str(frame).unwrap();
    match event {
        convai::ServerEvent::Audio(audio) => assert_eq!(audio.audio_base_64, "AQID"),
        other => panic!("unexpected event: {other:?}"),
    }

    let frame = r#"{"type":"conversation_initiation_metadata","conversation_initiation_metadata_event":{"conversation_id":"conv_1","agent_output_audio_format":"pcm_16000","user_input_audio_format":"pcm_16000"}}"#;
    let event: convai::ServerEvent = serde_json::from_str(frame).unwrap();
    assert!(matches!(
        event,
        convai::ServerEvent::ConversationInitiationMetadata(_)
    ));
}

#[test]
fn convai_tool_result_serializes_flat() {
    let out = convai::OutboundEvent::ClientToolResult {
        tool_call_id: "tc_9".to_string(),
        result: "ok".to_string(),
        is_error: false,
    };
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["type"], "client_tool_result");
    assert_eq!(json["tool_call_id"], "tc_9");
    assert_eq!(json["is_error"], false);
}

#[test]
fn malformed_frames_never_error() {
    let event: realtime::ServerEvent =
        serde_json::from_str(r#"{"type":"response.output_audio.delta"}"#).unwrap();
    assert!(matches!(event, realtime::ServerEvent::Unknown(_)));

    let event: convai::ServerEvent = serde_json::from_str(r#"{"no_type_at_all":1}"#).unwrap();
    assert!(matches!(event, convai::ServerEvent::Unknown(_)));
}
