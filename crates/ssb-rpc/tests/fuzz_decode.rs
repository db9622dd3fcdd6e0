use rand::{thread_rng, Rng};
use serde_json::json;
use ssb_rpc::{encode, Decoder, Packet};

#[test]
fn fuzz_decoder_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..2048);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);

        let mut decoder = Decoder::new();
        decoder.push(&data);
        while decoder.next_packet().is_some() {}
    }
}

#[test]
fn fuzz_random_chunking_reassembles() {
    let mut rng = thread_rng();
    let packets: Vec<Packet> = (1..=50)
        .map(|n| {
            if n % 2 == 0 {
                Packet::request(n, json!({"name": ["test"], "seq": n})).unwrap()
            } else {
                Packet::stream_request(n, vec![n as u8; n as usize * 3]).unwrap()
            }
        })
        .collect();
    let wire: Vec<u8> = packets
        .iter()
        .flat_map(|p| encode(p).unwrap().to_vec())
        .collect();

    for _ in 0..200 {
        let mut decoder = Decoder::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        while offset < wire.len() {
            let end = (offset + rng.gen_range(1..64)).min(wire.len());
            decoder.push(&wire[offset..end]);
            while let Some(result) = decoder.next_packet() {
                decoded.push(result.unwrap());
            }
            offset = end;
        }
        assert_eq!(decoded, packets);
        assert!(decoder.is_idle());
    }
}

#[test]
fn random_mutation_of_valid_frame_is_handled() {
    let mut rng = thread_rng();
    let frame = encode(&Packet::request(1, json!({"name": ["whoami"]})).unwrap()).unwrap();

    for _ in 0..1_000 {
        let mut mutated = frame.to_vec();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        let mut decoder = Decoder::new();
        decoder.push(&mutated);
        while decoder.next_packet().is_some() {}
    }
}
