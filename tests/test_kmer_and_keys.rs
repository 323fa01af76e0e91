#[cfg(test)]
mod tests {
    use kmersearch::search::codec::{encode, Alphabet};
    use kmersearch::search::error::Error;
    use kmersearch::search::kmer::*;

    /* --------------------------------------------------------------------- */
    /*  Helpers                                                              */
    /* --------------------------------------------------------------------- */

    fn params(k: u8, b: u8) -> KmerParams {
        KmerParams::new(k, b).unwrap()
    }

    /// 2-bit integer value of a concrete k-mer string.
    fn kmer_of(s: &str) -> u64 {
        s.bytes().fold(0u64, |acc, b| {
            (acc << 2)
                | match b {
                    b'A' => 0,
                    b'C' => 1,
                    b'G' => 2,
                    b'T' => 3,
                    _ => panic!("concrete bases only"),
                }
        })
    }

    fn kmers_of(seq: &str, alphabet: Alphabet, p: &KmerParams) -> Vec<u64> {
        let packed = encode(alphabet, seq.as_bytes()).unwrap();
        row_kmers(&packed, p).collect()
    }

    /* --------------------------------------------------------------------- */
    /*  Parameter validation                                                 */
    /* --------------------------------------------------------------------- */

    #[test]
    fn k_and_occ_bits_are_validated() {
        assert!(matches!(
            KmerParams::new(3, 8).unwrap_err(),
            Error::KSizeOutOfRange(3)
        ));
        assert!(matches!(
            KmerParams::new(33, 8).unwrap_err(),
            Error::KSizeOutOfRange(33)
        ));
        assert!(matches!(
            KmerParams::new(8, 0).unwrap_err(),
            Error::OccBitsOutOfRange(0)
        ));
        assert!(matches!(
            KmerParams::new(8, 17).unwrap_err(),
            Error::OccBitsOutOfRange(17)
        ));
        // 2k + b must stay within the widest key class
        assert!(matches!(
            KmerParams::new(32, 8).unwrap_err(),
            Error::KeyTooWide { bits: 72, .. }
        ));
        assert!(KmerParams::new(28, 8).is_ok());
    }

    #[test]
    fn key_width_class_follows_total_bits() {
        assert_eq!(params(4, 8).key_width(), KeyWidth::U16); // 16 bits
        assert_eq!(params(8, 8).key_width(), KeyWidth::U32); // 24 bits
        assert_eq!(params(12, 8).key_width(), KeyWidth::U32); // 32 bits
        assert_eq!(params(14, 8).key_width(), KeyWidth::U64); // 36 bits
        assert_eq!(params(28, 8).key_width(), KeyWidth::U64); // 64 bits
    }

    #[test]
    fn kmer_width_class_follows_2k() {
        assert_eq!(params(8, 8).kmer_width(), KeyWidth::U16); // k ≤ 8
        assert_eq!(params(16, 8).kmer_width(), KeyWidth::U32); // k ≤ 16
        assert_eq!(params(24, 8).kmer_width(), KeyWidth::U64);
    }

    /* --------------------------------------------------------------------- */
    /*  2-bit extraction                                                     */
    /* --------------------------------------------------------------------- */

    #[test]
    fn emits_exactly_n_minus_k_plus_1_kmers() {
        let p = params(5, 8);
        let full = "ACGT".repeat(10);
        for n in 0..40usize {
            let got = kmers_of(&full[..n], Alphabet::Dna2, &p).len();
            assert_eq!(got, n.saturating_sub(5 - 1), "n={n}");
        }
    }

    #[test]
    fn kmers_stream_left_to_right() {
        let p = params(4, 8);
        let got = kmers_of("ACGTAC", Alphabet::Dna2, &p);
        assert_eq!(
            got,
            vec![kmer_of("ACGT"), kmer_of("CGTA"), kmer_of("GTAC")]
        );
    }

    #[test]
    fn widest_usable_k_register_rolls_without_overflow() {
        // k=31 with b=1 is the widest key that still fits 64 bits
        let p = KmerParams::new(31, 1).unwrap();
        let seq: String = "ACGT".repeat(9); // 36 bases, 6 windows
        let got = kmers_of(&seq, Alphabet::Dna2, &p);
        assert_eq!(got.len(), 6);
        assert_eq!(got[0], kmer_of(&"ACGT".repeat(9)[..31]));
        // Window 4 realigns with window 0
        assert_eq!(got[4], got[0]);
    }

    /* --------------------------------------------------------------------- */
    /*  Occurrence ordinals and ngram keys                                   */
    /* --------------------------------------------------------------------- */

    #[test]
    fn occurrence_ordinals_follow_emission_order() {
        // ACGTACGT, k=4: (ACGT,0) (CGTA,0) (GTAC,0) (TACG,0) (ACGT,1)
        let p = params(4, 8);
        let packed = encode(Alphabet::Dna2, b"ACGTACGT").unwrap();
        let mut builder = KeyBuilder::new(&p);
        let keys = extract_row_keys(&packed, &p, &mut builder);
        let expect: Vec<u64> = [
            (kmer_of("ACGT"), 0),
            (kmer_of("CGTA"), 0),
            (kmer_of("GTAC"), 0),
            (kmer_of("TACG"), 0),
            (kmer_of("ACGT"), 1),
        ]
        .iter()
        .map(|&(km, ord)| (km << 8) | ord)
        .collect();
        assert_eq!(keys, expect);
    }

    #[test]
    fn ordinals_saturate_at_the_bit_width() {
        // b=1 saturates at ordinal 1: AAAA repeats give 0,1,1,1
        let p = params(4, 1);
        let packed = encode(Alphabet::Dna2, b"AAAAAAA").unwrap();
        let mut builder = KeyBuilder::new(&p);
        let keys = extract_row_keys(&packed, &p, &mut builder);
        let aaaa = kmer_of("AAAA");
        assert_eq!(
            keys,
            vec![aaaa << 1, (aaaa << 1) | 1, (aaaa << 1) | 1, (aaaa << 1) | 1]
        );
    }

    #[test]
    fn ordinals_restart_at_row_boundaries() {
        let p = params(4, 8);
        let packed = encode(Alphabet::Dna2, b"ACGTACGT").unwrap();
        let mut builder = KeyBuilder::new(&p);
        let first = extract_row_keys(&packed, &p, &mut builder);
        let second = extract_row_keys(&packed, &p, &mut builder);
        assert_eq!(first, second);
    }

    /* --------------------------------------------------------------------- */
    /*  Degenerate expansion                                                 */
    /* --------------------------------------------------------------------- */

    #[test]
    fn concrete_dna4_matches_dna2_extraction() {
        let p = params(4, 8);
        assert_eq!(
            kmers_of("ACGTACGT", Alphabet::Dna4, &p),
            kmers_of("ACGTACGT", Alphabet::Dna2, &p)
        );
    }

    #[test]
    fn degenerate_window_expands_in_ascending_order() {
        // TCGM: M = A|C, so TCGA then TCGC
        let p = params(4, 8);
        let got = kmers_of("TCGM", Alphabet::Dna4, &p);
        assert_eq!(got, vec![kmer_of("TCGA"), kmer_of("TCGC")]);

        // Product 9 stays under the cap: A H V A = 1·3·3·1
        let got = kmers_of("AHVA", Alphabet::Dna4, &p);
        assert_eq!(got.len(), 9);
        assert!(got.windows(2).all(|w| w[0] < w[1]), "ascending order");
    }

    #[test]
    fn over_cap_windows_are_skipped_whole() {
        let p = params(4, 8);
        // M M V A = 2·2·3·1 = 12 > 10: nothing, not a partial expansion
        assert!(kmers_of("MMVA", Alphabet::Dna4, &p).is_empty());
        // N alone is 4-fold degenerate: N N A A = 16 > 10
        assert!(kmers_of("NNAA", Alphabet::Dna4, &p).is_empty());
    }

    #[test]
    fn mixed_sequence_counts_per_window() {
        // ATCGMRWS, k=4:
        //   ATCG -> 1, TCGM -> 2, CGMR -> 4, GMRW -> 8, MRWS -> 16 (skipped)
        let p = params(4, 8);
        let got = kmers_of("ATCGMRWS", Alphabet::Dna4, &p);
        assert_eq!(got.len(), 1 + 2 + 4 + 8);
        assert_eq!(got[0], kmer_of("ATCG"));
    }

    /* --------------------------------------------------------------------- */
    /*  Query extraction                                                     */
    /* --------------------------------------------------------------------- */

    #[test]
    fn queries_below_64_bases_are_rejected() {
        let p = params(8, 8);
        let short = "ACGT".repeat(15); // 60 bases
        let err = extract_query_keys(short.as_bytes(), Alphabet::Dna2, &p).unwrap_err();
        assert!(matches!(err, Error::QueryTooShort { len: 60, min: 64 }));

        let ok = "ACGT".repeat(16); // 64 bases
        let keys = extract_query_keys(ok.as_bytes(), Alphabet::Dna2, &p).unwrap();
        assert_eq!(keys.len(), 64 - 8 + 1);
    }
}
