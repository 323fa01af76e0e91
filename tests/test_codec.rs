#[cfg(test)]
mod tests {
    use kmersearch::search::codec::*;
    use kmersearch::search::error::Error;

    /* --------------------------------------------------------------------- */
    /*  Helpers                                                              */
    /* --------------------------------------------------------------------- */

    const LETTERS2: &[u8] = b"ACGTacgtUu";
    const LETTERS4: &[u8] = b"ACGTMRWSYKVHDBNUacgtmrwsykvhdbnu";

    fn lcg(state: &mut u64) -> u64 {
        *state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        *state
    }

    fn random_seq(letters: &[u8], len: usize, state: &mut u64) -> Vec<u8> {
        (0..len)
            .map(|_| letters[(lcg(state) >> 33) as usize % letters.len()])
            .collect()
    }

    /// What decode must return: uppercase, with U stored as T.
    fn normalized(s: &[u8]) -> String {
        s.iter()
            .map(|&b| match b.to_ascii_uppercase() {
                b'U' => 'T',
                up => up as char,
            })
            .collect()
    }

    /* --------------------------------------------------------------------- */
    /*  Round-trips                                                          */
    /* --------------------------------------------------------------------- */

    #[test]
    fn roundtrip_dna2_every_length_to_2048() {
        let mut state = 1u64;
        for len in 0..=2048usize {
            let s = random_seq(LETTERS2, len, &mut state);
            let packed = encode(Alphabet::Dna2, &s).unwrap();
            assert_eq!(packed.len, len);
            assert_eq!(packed.bytes.len(), Alphabet::Dna2.packed_len(len));
            assert_eq!(decode(&packed), normalized(&s), "len {len}");
        }
    }

    #[test]
    fn roundtrip_dna4_every_length_to_2048() {
        let mut state = 2u64;
        for len in 0..=2048usize {
            let s = random_seq(LETTERS4, len, &mut state);
            let packed = encode(Alphabet::Dna4, &s).unwrap();
            assert_eq!(packed.bytes.len(), Alphabet::Dna4.packed_len(len));
            assert_eq!(decode(&packed), normalized(&s), "len {len}");
        }
    }

    /* --------------------------------------------------------------------- */
    /*  Bit layout                                                           */
    /* --------------------------------------------------------------------- */

    #[test]
    fn packed_layout_dna2_is_msb_first() {
        // A=00 C=01 G=10 T=11, first base in the high bits
        let packed = encode(Alphabet::Dna2, b"ACGT").unwrap();
        assert_eq!(packed.bytes, vec![0b0001_1011]);

        // 5th base lands in the top 2 bits of the second byte
        let packed = encode(Alphabet::Dna2, b"ACGTC").unwrap();
        assert_eq!(packed.bytes, vec![0b0001_1011, 0b0100_0000]);
    }

    #[test]
    fn packed_layout_dna4_is_msb_first() {
        // A=0001 C=0010; N=1111
        let packed = encode(Alphabet::Dna4, b"AC").unwrap();
        assert_eq!(packed.bytes, vec![0x12]);

        let packed = encode(Alphabet::Dna4, b"NCG").unwrap();
        assert_eq!(packed.bytes, vec![0xF2, 0x40]);
    }

    #[test]
    fn packed_form_orders_with_the_text() {
        // The MSB-first layout keeps byte order aligned with text order
        let pairs = [("AAAA", "AAAC"), ("ACGT", "AGGT"), ("CTTT", "GAAA")];
        for (lo, hi) in pairs {
            let plo = encode(Alphabet::Dna2, lo.as_bytes()).unwrap();
            let phi = encode(Alphabet::Dna2, hi.as_bytes()).unwrap();
            assert!(plo.bytes < phi.bytes, "{lo} < {hi}");
        }
    }

    #[test]
    fn u_maps_to_t_and_case_folds() {
        let packed = encode(Alphabet::Dna2, b"acguU").unwrap();
        assert_eq!(decode(&packed), "ACGTT");

        let packed = encode(Alphabet::Dna4, b"uryn").unwrap();
        assert_eq!(decode(&packed), "TRYN");
    }

    /* --------------------------------------------------------------------- */
    /*  Errors and edge cases                                                */
    /* --------------------------------------------------------------------- */

    #[test]
    fn invalid_character_reports_offset() {
        let err = encode(Alphabet::Dna2, b"ACGXT").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidCharacter { ch: 'X', offset: 3 }
        ));

        // N is valid in Dna4 but not Dna2
        assert!(encode(Alphabet::Dna2, b"ACGN").is_err());
        assert!(encode(Alphabet::Dna4, b"ACGN").is_ok());

        // Offset past the first full window
        let err = encode(Alphabet::Dna4, b"ACGTACG!").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidCharacter { ch: '!', offset: 7 }
        ));
    }

    #[test]
    fn empty_sequence_roundtrips() {
        let packed = encode(Alphabet::Dna2, b"").unwrap();
        assert!(packed.bytes.is_empty());
        assert_eq!(decode(&packed), "");
    }

    #[test]
    fn trailing_pad_bits_are_ignored_on_decode() {
        let mut packed = encode(Alphabet::Dna2, b"ACG").unwrap();
        assert_eq!(decode(&packed), "ACG");
        // Dirty the pad bits: bases 0..3 occupy the top 6 bits only
        packed.bytes[0] |= 0b0000_0011;
        assert_eq!(decode(&packed), "ACG");
    }

    /* --------------------------------------------------------------------- */
    /*  Wide/scalar parity                                                   */
    /* --------------------------------------------------------------------- */

    #[test]
    fn wide_encode_matches_scalar_every_length_to_2048() {
        let mut state = 3u64;
        for len in 0..=2048usize {
            let s2 = random_seq(LETTERS2, len, &mut state);
            let s4 = random_seq(LETTERS4, len, &mut state);
            assert_eq!(
                encode_with(&WIDE, Alphabet::Dna2, &s2).unwrap(),
                encode_with(&SCALAR, Alphabet::Dna2, &s2).unwrap(),
                "dna2 len {len}"
            );
            assert_eq!(
                encode_with(&WIDE, Alphabet::Dna4, &s4).unwrap(),
                encode_with(&SCALAR, Alphabet::Dna4, &s4).unwrap(),
                "dna4 len {len}"
            );
        }
    }

    #[test]
    fn wide_decode_matches_scalar_every_length_to_2048() {
        let mut state = 4u64;
        for len in 0..=2048usize {
            let s2 = random_seq(LETTERS2, len, &mut state);
            let s4 = random_seq(LETTERS4, len, &mut state);
            let p2 = encode_with(&SCALAR, Alphabet::Dna2, &s2).unwrap();
            let p4 = encode_with(&SCALAR, Alphabet::Dna4, &s4).unwrap();
            assert_eq!(
                decode_with(&WIDE, Alphabet::Dna2, &p2, len),
                decode_with(&SCALAR, Alphabet::Dna2, &p2, len),
                "dna2 len {len}"
            );
            assert_eq!(
                decode_with(&WIDE, Alphabet::Dna4, &p4, len),
                decode_with(&SCALAR, Alphabet::Dna4, &p4, len),
                "dna4 len {len}"
            );
        }
    }

    #[test]
    fn wide_rejects_what_scalar_rejects() {
        // The invalid byte sits inside a full window for both variants
        for bad in [&b"ACXT"[..], &b"ACGTACZTACGT"[..]] {
            let s = encode_with(&SCALAR, Alphabet::Dna2, bad).unwrap_err();
            let w = encode_with(&WIDE, Alphabet::Dna2, bad).unwrap_err();
            match (s, w) {
                (
                    Error::InvalidCharacter { ch: c1, offset: o1 },
                    Error::InvalidCharacter { ch: c2, offset: o2 },
                ) => {
                    assert_eq!(c1, c2);
                    assert_eq!(o1, o2);
                }
                other => panic!("expected InvalidCharacter pair, got {other:?}"),
            }
        }
    }

    #[test]
    fn active_codec_passed_parity() {
        // The dispatch table only ever holds parity-tested variants
        assert!(["wide", "scalar"].contains(&active().name));
    }
}
