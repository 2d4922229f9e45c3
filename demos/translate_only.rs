//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use responses_bridge::translate::anthropic_types::MessagesResponse;
use responses_bridge::translate::canonical::CanonicalRequest;
use responses_bridge::translate::normalize::normalize_request;
use responses_bridge::translate::streaming::{StreamFrame, StreamNormalizer};
use responses_bridge::translate::{
    AnthropicTranslator, GoogleTranslator, OllamaTranslator, OpenAiTranslator, Translator,
};
use serde_json::json;

fn main() {
    // One canonical request, as a caller would send it
    let request: CanonicalRequest = serde_json::from_value(json!({
        "model": "claude-sonnet-4-5",
        "instructions": "You are a geography expert. Be concise.",
        "input": [
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": "The capital of France is Paris."},
            {"role": "user", "content": "And Germany?"}
        ],
        "temperature": 0.7
    }))
    .unwrap();
    let request = normalize_request(request).unwrap();

    println!("=== OpenAI ===");
    let openai = OpenAiTranslator::to_provider_request(&request).unwrap();
    println!("{}", serde_json::to_string_pretty(&openai).unwrap());

    println!();
    println!("=== Anthropic ===");
    let anthropic = AnthropicTranslator::to_provider_request(&request).unwrap();
    println!("{}", serde_json::to_string_pretty(&anthropic).unwrap());

    println!();
    println!("=== Google ===");
    let google = GoogleTranslator::to_provider_request(&request).unwrap();
    println!("{}", serde_json::to_string_pretty(&google).unwrap());

    println!();
    println!("=== Ollama ===");
    let ollama = OllamaTranslator::to_provider_request(&request).unwrap();
    println!("{}", serde_json::to_string_pretty(&ollama).unwrap());

    // Simulate an Anthropic reply and translate it back
    let reply: MessagesResponse = serde_json::from_value(json!({
        "id": "msg_demo",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-5",
        "content": [{"type": "text", "text": "The capital of Germany is Berlin."}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 42, "output_tokens": 8}
    }))
    .unwrap();
    let response = AnthropicTranslator::from_provider_response(reply, &request);

    println!();
    println!("=== Canonical response ===");
    println!("{}", serde_json::to_string_pretty(&response).unwrap());

    // Re-frame an OpenAI chunk stream into delta/done events
    println!();
    println!("=== Streaming normalization ===");

    let frames = [
        json!({"id": "chatcmpl-demo", "choices": [{"index": 0, "delta": {"role": "assistant", "content": "The"}}]}).to_string(),
        json!({"id": "chatcmpl-demo", "choices": [{"index": 0, "delta": {"content": " capital"}}]}).to_string(),
        json!({"id": "chatcmpl-demo", "choices": [{"index": 0, "delta": {"content": " is Berlin."}}]}).to_string(),
        json!({"id": "chatcmpl-demo", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}).to_string(),
        "[DONE]".to_string(),
    ];

    let mut normalizer = StreamNormalizer::new();
    for (i, data) in frames.into_iter().enumerate() {
        let signals =
            OpenAiTranslator::decode_stream_frame(&StreamFrame::data(data), &mut ()).unwrap();
        for event in normalizer.apply(signals) {
            println!("  frame {} -> {}", i, serde_json::to_string(&event).unwrap());
        }
    }

    println!();
    println!("Done! The translation layer works without any network calls.");
}
