use crate::types::*;
use crossbeam_channel::Receiver;
use log::{debug, error, info};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

/// Forwards engine events as OSC messages over UDP.
pub struct OscSender {
    rx: Receiver<StampedEvent>,
    target: String,
}

impl OscSender {
    pub fn new(rx: Receiver<StampedEvent>, target: String) -> Self {
        Self { rx, target }
    }

    /// Run the OSC sender loop. Blocks the calling thread until the
    /// engine side of the channel is dropped.
    pub fn run(&self) {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to bind UDP socket: {}", e);
                return;
            }
        };
        info!("OSC sender → {}", self.target);

        let mut sent: u64 = 0;
        for stamped in self.rx.iter() {
            match self.send_event(&socket, &stamped.event) {
                Ok(()) => sent += 1,
                Err(e) => debug!("OSC send error: {}", e),
            }
        }
        info!("OSC sender shutting down after {} messages", sent);
    }

    fn send_event(
        &self,
        socket: &UdpSocket,
        event: &OutputEvent,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let buf = rosc::encoder::encode(&OscPacket::Message(to_message(event)))?;
        socket.send_to(&buf, &self.target)?;
        Ok(())
    }
}

/// The OSC message for one engine event.
pub fn to_message(event: &OutputEvent) -> OscMessage {
    let int = |v: u8| OscType::Int(v as i32);
    let (addr, args) = match *event {
        OutputEvent::NoteOn {
            pitch,
            velocity,
            channel,
        } => ("/reverie/note_on", vec![int(pitch), int(velocity), int(channel)]),
        OutputEvent::NoteOff { pitch, channel } => {
            ("/reverie/note_off", vec![int(pitch), int(channel)])
        }
        OutputEvent::ControlChange {
            controller,
            value,
            channel,
        } => ("/reverie/cc", vec![int(controller), int(value), int(channel)]),
        OutputEvent::PitchBend { value, channel } => (
            "/reverie/bend",
            vec![OscType::Int(value as i32), int(channel)],
        ),
        OutputEvent::ChordChange { chord } => (
            "/reverie/chord",
            vec![int(chord.root), OscType::String(chord.to_string())],
        ),
    };
    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::{Chord, ChordQuality};
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_note_messages() {
        let msg = to_message(&OutputEvent::NoteOn {
            pitch: 64,
            velocity: 70,
            channel: 1,
        });
        assert_eq!(msg.addr, "/reverie/note_on");
        assert_eq!(
            msg.args,
            vec![OscType::Int(64), OscType::Int(70), OscType::Int(1)]
        );

        let msg = to_message(&OutputEvent::NoteOff { pitch: 64, channel: 1 });
        assert_eq!(msg.addr, "/reverie/note_off");
        assert_eq!(msg.args.len(), 2);
    }

    #[test]
    fn test_chord_message_carries_name() {
        let msg = to_message(&OutputEvent::ChordChange {
            chord: Chord::new(7, ChordQuality::Dominant7),
        });
        assert_eq!(msg.addr, "/reverie/chord");
        assert_eq!(msg.args[0], OscType::Int(7));
        assert_eq!(msg.args[1], OscType::String("G7".into()));
    }

    #[test]
    fn test_sender_delivers_over_udp() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = listener.local_addr().unwrap().to_string();

        let (tx, rx) = bounded(4);
        let handle = std::thread::spawn(move || OscSender::new(rx, target).run());
        tx.send(StampedEvent {
            t: 0,
            event: OutputEvent::ControlChange {
                controller: 123,
                value: 0,
                channel: 0,
            },
        })
        .unwrap();
        drop(tx);

        let mut buf = [0u8; 512];
        let n = listener.recv(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..n]).unwrap();
        match packet {
            OscPacket::Message(m) => assert_eq!(m.addr, "/reverie/cc"),
            other => panic!("unexpected packet {:?}", other),
        }
        handle.join().unwrap();
    }
}
