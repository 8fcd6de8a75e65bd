//! Basic usage example for the relay wire protocol.

use bytes::Bytes;
use relay_wire::{
    ClientId, MessageType, Packetizer, Registration, Request, RequestHeader, Response,
    ResponseHeader, SendMessage, PUBLIC_KEY_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Relay Wire Protocol Example ===\n");

    // 1. Encode a registration request
    println!("1. Encoding a REGISTER request...");
    let register = Request::Register(Registration {
        name: "alice".to_string(),
        public_key: Bytes::from(vec![0x11u8; PUBLIC_KEY_SIZE]),
    });
    let bytes = register.encode(ClientId::default())?;
    println!("   Encoded request size: {} bytes", bytes.len());

    // 2. Decode it back the way the server does: header first, then body
    println!("\n2. Decoding header and body...");
    let header = RequestHeader::decode(&bytes)?;
    let decoded = Request::decode_body(header.request_code()?, &bytes[REQUEST_HEADER_SIZE..])?;
    println!("   Code: {:?}, payload: {} bytes", header.request_code()?, header.payload_size);
    if let Request::Register(registration) = decoded {
        println!("   Name: {}", registration.name);
    }

    // 3. Frame a large message into packets
    println!("\n3. Framing a 3000-byte SEND_MESSAGE request...");
    let send = Request::SendMessage(SendMessage {
        target: ClientId([0x22; 16]),
        message_type: MessageType::File as u8,
        content: Bytes::from(vec![0x42u8; 3000]),
    });
    let packets = Packetizer::new().split_padded(send.encode(ClientId([0x33; 16]))?);
    println!("   Split into {} packets", packets.len());

    // 4. Encode and decode a response
    println!("\n4. Encoding a REGISTERED response...");
    let response = Response::Registered {
        client_id: ClientId([0x44; 16]),
    };
    let encoded = response.encode()?;
    let response_header = ResponseHeader::decode(&encoded)?;
    let decoded = Response::decode(&response_header, encoded.slice(RESPONSE_HEADER_SIZE..))?;
    println!("   Round trip matches: {}", decoded == response);

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
