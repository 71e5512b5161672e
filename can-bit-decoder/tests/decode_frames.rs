// End-to-end decoding of synthetic captures
use can_bit_decoder::stuffing::Destuffer;
use can_bit_decoder::synth::{FrameSpec, SignalBuilder, TxBit, TxBitKind};
use can_bit_decoder::{CanDecoder, DecodeOutput, DecoderConfig, ErrorFlags, Packet};
use std::sync::atomic::AtomicBool;

fn config() -> DecoderConfig {
    // 40 samples per nominal bit, 10 per data bit
    DecoderConfig::new()
}

fn capture(config: &DecoderConfig, frames: &[FrameSpec]) -> Vec<bool> {
    let mut builder = SignalBuilder::new(config).idle(12);
    for frame in frames {
        builder = builder.frame(frame).idle(20);
    }
    builder.finish()
}

fn render(config: &DecoderConfig, bits: &[TxBit]) -> Vec<bool> {
    SignalBuilder::new(config).idle(12).bits(bits).idle(20).finish()
}

fn decode_with(config: DecoderConfig, samples: &[bool]) -> DecodeOutput {
    let _ = env_logger::builder().is_test(true).try_init();
    CanDecoder::new(config).unwrap().decode(samples)
}

fn decode(samples: &[bool]) -> DecodeOutput {
    decode_with(config(), samples)
}

fn assert_matches(packet: &Packet, spec: &FrameSpec) {
    assert_eq!(packet.id, spec.id, "id");
    assert_eq!(packet.is_29bit, spec.extended, "29-bit");
    assert_eq!(packet.is_fd, spec.fd, "fd");
    assert_eq!(packet.brs, spec.brs, "brs");
    assert_eq!(packet.esi, spec.esi, "esi");
    assert_eq!(packet.rtr, spec.remote && !spec.fd, "rtr");
    assert_eq!(packet.dlc, spec.dlc_code(), "dlc");
    assert_eq!(packet.data, spec.payload(), "data");
    assert_eq!(packet.crc_received, spec.crc_value(), "crc");
    assert_eq!(packet.crc_computed, packet.crc_received);
    assert!(packet.ack);
    assert!(packet.errors.is_empty(), "unexpected errors: {}", packet.errors);
}

#[test]
fn classic_11bit_frame() {
    let spec = FrameSpec::classic(0x123, &[0xAA, 0xBB]);
    let output = decode(&capture(&config(), &[spec.clone()]));

    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert!(!packet.is_29bit);
    assert_eq!(packet.id, 0x123);
    assert_eq!(packet.data, vec![0xAA, 0xBB]);
    assert_eq!(packet.errors, ErrorFlags::empty());
    assert_matches(packet, &spec);
}

#[test]
fn corrupted_data_bit_sets_only_crc_flag() {
    let original = FrameSpec::classic(0x123, &[0xAA, 0xBB]);
    let corrupted = FrameSpec::classic(0x123, &[0xAA, 0xBA]).with_crc(original.crc_value());

    let output = decode(&capture(&config(), &[corrupted]));
    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert_eq!(packet.errors, ErrorFlags::CRC);
    assert_eq!(packet.id, 0x123);
    assert_eq!(packet.dlc, 2);
    assert_eq!(packet.data, vec![0xAA, 0xBA]);
    assert_eq!(packet.crc_received, original.crc_value());
    assert_ne!(packet.crc_computed, packet.crc_received);

    let crc_field = output
        .field_marks
        .iter()
        .find(|m| m.name.starts_with("CRC"))
        .unwrap();
    assert!(crc_field.error);
}

#[test]
fn fd_crc_sensitivity() {
    // 8 bytes use CRC-17, 20 bytes use CRC-21
    for len in [8usize, 20] {
        let data: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
        let original = FrameSpec::fd(0x2A1, &data).with_brs();

        let mut flipped = data.clone();
        flipped[len / 2] ^= 0x10;
        let corrupted = FrameSpec::fd(0x2A1, &flipped)
            .with_brs()
            .with_crc(original.crc_value());

        let output = decode(&capture(&config(), &[corrupted]));
        assert_eq!(output.packets.len(), 1, "len {}", len);
        assert_eq!(output.packets[0].errors, ErrorFlags::CRC, "len {}", len);
        assert_eq!(output.packets[0].data, flipped);
    }
}

#[test]
fn fd_dlc_expansion() {
    let data: Vec<u8> = (1..=12).collect();
    let spec = FrameSpec::fd(0x321, &data);
    let output = decode(&capture(&config(), &[spec.clone()]));

    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert!(packet.is_fd);
    assert_eq!(packet.dlc, 9);
    assert_eq!(packet.data.len(), 12);
    assert_matches(packet, &spec);
}

#[test]
fn six_identical_bits_flag_dynamic_stuffing() {
    let spec = FrameSpec::classic(0x000, &[0x00]);
    let mut bits = spec.encode();
    let stuff = bits
        .iter()
        .position(|b| b.kind == TxBitKind::DynamicStuff)
        .unwrap();
    bits[stuff].value = bits[stuff - 1].value;

    let samples = SignalBuilder::new(&config())
        .idle(12)
        .bits(&bits)
        .idle(20)
        .finish();
    let output = decode(&samples);

    assert!(!output.packets.is_empty());
    assert!(output.packets[0]
        .errors
        .contains(ErrorFlags::DYNAMIC_STUFFING));
    let marks = output.marks_of(&output.packets[0]);
    assert!(marks.iter().any(|m| m.name == "Stuff" && m.error));
}

#[test]
fn truncated_capture_drops_frame_in_progress() {
    let config = config();
    let first = FrameSpec::classic(0x100, &[0x01]);
    let second = FrameSpec::classic(0x200, &[0x02, 0x03]);

    let builder = SignalBuilder::new(&config).idle(12).frame(&first).idle(12);
    let second_start = builder.position();
    let samples = builder.frame(&second).idle(12).finish();

    // Cut 30 bit times into the second frame
    let cut = second_start + 30 * 40;
    let output = decode(&samples[..cut]);

    assert_eq!(output.packets.len(), 1);
    assert_eq!(output.packets[0].id, 0x100);
    assert!(!output.aborted);
    // Annotations of the dropped frame are gone as well
    assert_eq!(output.bit_marks.len(), output.packets[0].bit_marks.end);
}

#[test]
fn round_trip_mixed_traffic() {
    let frames = vec![
        FrameSpec::classic(0x7FF, &[0xFF, 0x00, 0xFF]),
        FrameSpec::classic(0x1ABC_DEF0, &[0x12, 0x34, 0x56, 0x78]).extended(),
        FrameSpec::remote(0x7E0, 8),
        FrameSpec::classic(0x055, &[]),
        FrameSpec::fd(0x0F0, &[0x00; 16]),
        FrameSpec::fd(0x1234_5678, &[0xC3; 24]).extended().with_brs(),
        FrameSpec::fd(0x001, &(0..64).collect::<Vec<u8>>())
            .with_brs()
            .with_esi(),
        FrameSpec::fd(0x3FF, &[]).with_brs(),
    ];
    let output = decode(&capture(&config(), &frames));

    assert_eq!(output.packets.len(), frames.len());
    for (packet, spec) in output.packets.iter().zip(&frames) {
        assert_matches(packet, spec);
    }
    assert_eq!(output.error_packet_count(), 0);
    assert_eq!(output.total_errors(), 0);
}

#[test]
fn classic_dlc_above_eight_carries_eight_bytes() {
    let spec = FrameSpec::classic(0x10, &[1, 2, 3, 4, 5, 6, 7, 8]).with_dlc(12);
    let output = decode(&capture(&config(), &[spec.clone()]));
    assert_eq!(output.packets.len(), 1);
    assert_eq!(output.packets[0].dlc, 12);
    assert_eq!(output.packets[0].data.len(), 8);
    assert_matches(&output.packets[0], &spec);
}

#[test]
fn destuffing_recovers_field_bits() {
    let frames = [
        FrameSpec::fd(0x000, &[0x00; 8]),
        FrameSpec::fd(0x7FF, &[0xFF; 12]),
        FrameSpec::fd(0x1F0F_0F0F, &[0x07, 0xC1, 0xF8, 0x3E]).extended(),
    ];

    for spec in &frames {
        let bits = spec.encode();
        // FD dynamic stuffing ends where the first fixed stuff bit starts
        let end = bits
            .iter()
            .position(|b| b.kind == TxBitKind::FixedStuff)
            .unwrap();

        let mut destuffer = Destuffer::new();
        destuffer.start_dynamic();
        let mut recovered = Vec::new();
        for bit in &bits[..end] {
            let stuff = destuffer.push(bit.value);
            assert_eq!(stuff.is_stuff(), bit.kind == TxBitKind::DynamicStuff);
            if !stuff.is_stuff() {
                recovered.push(bit.value);
            }
        }

        let original: Vec<bool> = bits[..end]
            .iter()
            .filter(|b| b.kind == TxBitKind::Field)
            .map(|b| b.value)
            .collect();
        assert_eq!(recovered, original);
        assert!(destuffer.dynamic_count() > 0);
    }
}

#[test]
fn bit_rate_switch_positions() {
    // BRS: 40 * 0.75 nominal + 10 * (1 - 0.7) data = 33 samples
    // DL1: 10 * 0.7 data + 40 * (1 - 0.75) nominal = 17 samples
    let config = DecoderConfig::new().with_sample_points(0.75, 0.7);
    let spec = FrameSpec::fd(0x0AB, &[0x5A; 8]).with_brs();
    let output = decode_with(config.clone(), &capture(&config, &[spec.clone()]));

    assert_eq!(output.packets.len(), 1);
    assert_matches(&output.packets[0], &spec);

    let marks = output.marks_of(&output.packets[0]);
    let find = |name: &str| marks.iter().find(|m| m.name == name).unwrap();

    let brs = find("BRS");
    assert_eq!(brs.end - brs.start, 33);
    let esi = find("ESI");
    assert_eq!(esi.start, brs.end);
    assert_eq!(esi.end - esi.start, 10);
    let dl1 = find("DL1");
    assert_eq!(dl1.end - dl1.start, 17);
    let ack = find("ACK");
    assert_eq!(ack.end - ack.start, 40);
}

#[test]
fn decoding_is_idempotent() {
    let frames = [
        FrameSpec::classic(0x123, &[0xAA, 0xBB]),
        FrameSpec::fd(0x456, &[0x11; 32]).with_brs(),
    ];
    let samples = capture(&config(), &frames);
    let decoder = CanDecoder::new(config()).unwrap();

    let first = decoder.decode(&samples);
    let second = decoder.decode(&samples);
    assert_eq!(first, second);
    assert_eq!(first.packets.len(), 2);
}

#[test]
fn missing_ack_is_bit_status_error() {
    let spec = FrameSpec::classic(0x321, &[0x42]).without_ack();
    let output = decode(&capture(&config(), &[spec]));

    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert!(!packet.ack);
    assert_eq!(packet.errors, ErrorFlags::BIT_STATUS);
    assert_eq!(packet.data, vec![0x42]);
}

#[test]
fn glitch_in_steady_window_is_timing_error() {
    let spec = FrameSpec::classic(0x321, &[0x42]);
    let mut samples = capture(&config(), &[spec]);

    let clean = decode(&samples);
    let dl2 = clean.bit_marks.iter().find(|m| m.name == "DL2").unwrap();
    // 30 % into a recessive bit, well before its sample point
    samples[dl2.start + 12] = !samples[dl2.start + 12];

    let output = decode(&samples);
    assert_eq!(output.packets.len(), 1);
    assert_eq!(output.packets[0].errors, ErrorFlags::TIMING);
    let mark = output.bit_marks.iter().find(|m| m.name == "DL2").unwrap();
    assert!(mark.error);
}

#[test]
fn broken_fixed_stuff_bit() {
    let spec = FrameSpec::fd(0x155, &[0x81, 0x42]);
    let mut bits = spec.encode();
    let fsb = bits
        .iter()
        .rposition(|b| b.kind == TxBitKind::FixedStuff)
        .unwrap();
    bits[fsb].value = !bits[fsb].value;

    let samples = SignalBuilder::new(&config())
        .idle(12)
        .bits(&bits)
        .idle(20)
        .finish();
    let output = decode(&samples);

    assert_eq!(output.packets.len(), 1);
    assert_eq!(output.packets[0].errors, ErrorFlags::FIXED_STUFFING);
    assert!(output
        .bit_marks
        .iter()
        .any(|m| m.name == "FSB" && m.error));
}

#[test]
fn wrong_stuff_count_parity() {
    let spec = FrameSpec::fd(0x000, &[0x00; 4]);
    let mut bits = spec.encode();
    let first_fsb = bits
        .iter()
        .position(|b| b.kind == TxBitKind::FixedStuff)
        .unwrap();
    // SC2 SC1 SC0 PAR follow the first fixed stuff bit
    let parity = first_fsb + 4;
    bits[parity].value = !bits[parity].value;
    // Keep the next fixed stuff bit consistent with the new parity
    bits[parity + 1].value = !bits[parity].value;

    let samples = SignalBuilder::new(&config())
        .idle(12)
        .bits(&bits)
        .idle(20)
        .finish();
    let output = decode(&samples);

    assert_eq!(output.packets.len(), 1);
    let errors = output.packets[0].errors;
    assert!(errors.contains(ErrorFlags::STUFF_COUNT));
    assert!(!errors.contains(ErrorFlags::FIXED_STUFFING));
    assert!(!errors.contains(ErrorFlags::DYNAMIC_STUFFING));
}

#[test]
fn corrupted_frame_closes_after_idle_bits() {
    let bits = FrameSpec::classic(0x2F0, &[0x0F, 0xF0]).encode();
    let samples = SignalBuilder::new(&config())
        .idle(12)
        .bits(&bits[..25])
        .idle(40)
        .finish();
    let output = decode(&samples);

    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert!(packet.has_errors());
    // Closed well before the end of the capture
    assert!(packet.end_sample + 20 * 40 < samples.len());
}

#[test]
fn extended_frame_bit_names() {
    let spec = FrameSpec::classic(0x1555_5555, &[0x01]).extended();
    let output = decode(&capture(&config(), &[spec.clone()]));
    assert_eq!(output.packets.len(), 1);
    assert_matches(&output.packets[0], &spec);

    let names: Vec<&str> = output
        .marks_of(&output.packets[0])
        .iter()
        .map(|m| m.name.as_str())
        .filter(|n| *n != "Stuff")
        .collect();
    assert_eq!(&names[..3], &["SOF", "ID28", "ID27"]);
    assert_eq!(names[12], "SRR");
    assert_eq!(names[13], "IDE");
    assert_eq!(names[14], "ID17");
    assert_eq!(names[32], "RTR");
}

#[test]
fn fd_bit_names_are_relabelled() {
    let spec = FrameSpec::fd(0x123, &[0x01]);
    let output = decode(&capture(&config(), &[spec]));
    let names: Vec<&str> = output
        .bit_marks
        .iter()
        .map(|m| m.name.as_str())
        .filter(|n| *n != "Stuff")
        .collect();
    assert_eq!(names[12], "RRS");
    assert_eq!(names[14], "FDF");
    assert_eq!(names[16], "BRS");
    assert!(output.field_marks.iter().any(|m| m.name.starts_with("STC")));
}

#[test]
fn inverted_idle_level() {
    let config = config().with_idle_level(false);
    let spec = FrameSpec::classic(0x0C4, &[0xDE, 0xAD]);
    let samples = capture(&config, &[spec.clone()]);
    assert!(!samples[0]);

    let output = decode_with(config, &samples);
    assert_eq!(output.packets.len(), 1);
    assert_matches(&output.packets[0], &spec);
}

#[test]
fn back_to_back_frames() {
    let config = config();
    let first = FrameSpec::classic(0x001, &[0x11]);
    let second = FrameSpec::classic(0x002, &[0x22]);
    let samples = SignalBuilder::new(&config)
        .idle(12)
        .frame(&first)
        .idle(3)
        .frame(&second)
        .idle(12)
        .finish();

    let output = decode(&samples);
    assert_eq!(output.packets.len(), 2);
    assert_matches(&output.packets[0], &first);
    assert_matches(&output.packets[1], &second);
    assert!(output.packets[0].end_sample < output.packets[1].start_sample);
}

#[test]
fn abort_flag_stops_decoding() {
    let samples = capture(&config(), &[FrameSpec::classic(0x123, &[0xAA])]);
    let decoder = CanDecoder::new(config()).unwrap();

    let output = decoder.decode_with_abort(&samples, &AtomicBool::new(true));
    assert!(output.aborted);
    assert!(output.packets.is_empty());
    assert!(output.bit_marks.is_empty());
    assert!(output.field_marks.is_empty());
}

#[test]
fn packets_serialize() {
    let output = decode(&capture(&config(), &[FrameSpec::classic(0x123, &[0xAA])]));
    let json = serde_json::to_value(&output.packets[0]).unwrap();
    assert_eq!(json["id"], 0x123);
    assert_eq!(json["errors"], 0);
    assert_eq!(json["layout"], "Classic11");
}

#[test]
fn brs_frames_at_the_shortest_valid_data_sample_margin() {
    // One data sample left after the sample point
    let config = config().with_data_rate(5.0).with_sample_points(0.75, 0.8);
    let frames = vec![
        FrameSpec::fd(0x0AB, &[0x5A; 8]).with_brs(),
        FrameSpec::fd(0x1234_5678, &[0x00, 0xFF, 0x0F, 0xF0]).extended().with_brs(),
        FrameSpec::fd(0x7FF, &(0..48).collect::<Vec<u8>>()).with_brs().with_esi(),
    ];
    let output = decode_with(config.clone(), &capture(&config, &frames));

    assert_eq!(output.packets.len(), frames.len());
    for (packet, spec) in output.packets.iter().zip(&frames) {
        assert_matches(packet, spec);
    }

    // Half a sample is not enough
    let config = config.with_sample_points(0.75, 0.9);
    assert!(CanDecoder::new(config).is_err());
}

#[test]
fn dominant_srr_is_bit_status_error() {
    // Alternating ID bits keep the stuffing unchanged when SRR flips
    let spec = FrameSpec::classic(0x1555_5555, &[0x01]).extended();
    let mut bits = spec.encode();
    let srr = bits
        .iter()
        .enumerate()
        .filter(|(_, b)| b.kind == TxBitKind::Field)
        .nth(12)
        .map(|(i, _)| i)
        .unwrap();
    assert!(bits[srr].value);
    bits[srr].value = false;

    let output = decode(&render(&config(), &bits));
    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert_eq!(packet.id, 0x1555_5555);
    assert!(packet.is_29bit);
    // SRR is covered by the CRC as well
    assert_eq!(packet.errors, ErrorFlags::CRC | ErrorFlags::BIT_STATUS);
    let srr_mark = output.bit_marks.iter().find(|m| m.name == "SRR").unwrap();
    assert!(srr_mark.error);
}

#[test]
fn dominant_delimiter_is_bit_status_error() {
    let spec = FrameSpec::classic(0x321, &[0x42, 0x24]);
    let mut bits = spec.encode();
    let dl1 = bits.len() - 10;
    bits[dl1].value = false;

    let output = decode(&render(&config(), &bits));
    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert_eq!(packet.errors, ErrorFlags::BIT_STATUS);
    assert!(packet.ack);
    assert_eq!(packet.data, vec![0x42, 0x24]);

    let marks = output.marks_of(packet);
    assert!(marks.iter().find(|m| m.name == "DL1").unwrap().error);
    assert!(!marks.iter().find(|m| m.name == "ACK").unwrap().error);
}

#[test]
fn dominant_end_of_frame_bit_is_bit_status_error() {
    let spec = FrameSpec::fd(0x456, &[0x11; 12]).with_brs();
    let mut bits = spec.encode();
    let eof5 = bits.len() - 3;
    bits[eof5].value = false;

    let output = decode(&render(&config(), &bits));
    assert_eq!(output.packets.len(), 1);
    let packet = &output.packets[0];
    assert_eq!(packet.errors, ErrorFlags::BIT_STATUS);
    assert_eq!(packet.crc_received, spec.crc_value());

    let marks = output.marks_of(packet);
    assert_eq!(marks.last().unwrap().name, "EOF7");
    assert!(marks.iter().find(|m| m.name == "EOF5").unwrap().error);
    assert!(!marks.iter().find(|m| m.name == "EOF4").unwrap().error);
}

#[test]
fn late_ack_after_switching_back_to_nominal_rate() {
    let config = config();
    let delay_ack = |spec: &FrameSpec| {
        let mut samples = capture(&config, &[spec.clone()]);
        let clean = decode(&samples);
        let ack = clean.bit_marks.iter().find(|m| m.name == "ACK").unwrap();
        // Receivers drive ACK dominant 35 % into the slot
        let delay = (ack.end - ack.start) * 35 / 100;
        for sample in &mut samples[ack.start..ack.start + delay] {
            *sample = config.idle_level;
        }
        decode(&samples)
    };

    // The CRC delimiter may stretch after a bit rate switch
    let spec = FrameSpec::fd(0x0AB, &[0x5A; 8]).with_brs();
    let output = delay_ack(&spec);
    assert_eq!(output.packets.len(), 1);
    assert!(output.packets[0].ack);
    assert_matches(&output.packets[0], &spec);

    // Without a switch the same edge falls into the steady window
    let output = delay_ack(&FrameSpec::classic(0x0AB, &[0x5A]));
    assert_eq!(output.packets.len(), 1);
    assert!(output.packets[0].ack);
    assert_eq!(output.packets[0].errors, ErrorFlags::TIMING);
}

#[test]
fn resync_follows_a_skewed_transmitter() {
    let frames = vec![
        FrameSpec::classic(0x7FF, &[0xFF, 0x00, 0xFF]),
        FrameSpec::classic(0x1ABC_DEF0, &[0x12, 0x34, 0x56, 0x78]).extended(),
        FrameSpec::fd(0x0F0, &[0xC3; 16]),
    ];

    // 1 % slow and 1 % fast against the 40 samples the decoder expects
    for spb in [40.4, 39.6] {
        let transmitter = config().with_nominal_rate(spb);
        let output = decode(&capture(&transmitter, &frames));

        assert_eq!(output.packets.len(), frames.len(), "{} samples per bit", spb);
        for (packet, spec) in output.packets.iter().zip(&frames) {
            assert_matches(packet, spec);
        }
    }
}

#[test]
fn classic_crc_ending_on_a_run_takes_one_more_stuff_bit() {
    let spec = (0..=255u8)
        .map(|b| FrameSpec::classic(0x123, &[b]))
        .find(|spec| {
            let bits = spec.encode();
            bits[bits.len() - 11].kind == TxBitKind::DynamicStuff
        })
        .expect("a CRC ending on five identical bits");

    let output = decode(&capture(&config(), &[spec.clone()]));
    assert_eq!(output.packets.len(), 1);
    assert_matches(&output.packets[0], &spec);

    let marks = output.marks_of(&output.packets[0]);
    let dl1 = marks.iter().position(|m| m.name == "DL1").unwrap();
    assert_eq!(marks[dl1 - 1].name, "Stuff");
    assert!(!marks[dl1 - 1].error);
    assert_eq!(marks[dl1 - 2].name, "CRC0");

    // The same stuff bit repeating the run is a stuffing error
    let mut bits = spec.encode();
    let stuff = bits.len() - 11;
    bits[stuff].value = bits[stuff - 1].value;
    let output = decode(&render(&config(), &bits));
    assert_eq!(output.packets.len(), 1);
    assert!(output.packets[0]
        .errors
        .contains(ErrorFlags::DYNAMIC_STUFFING));
}
