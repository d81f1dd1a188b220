use std::cmp::Ordering;
use trieste_trie::{hex_to_keybytes, keybytes_to_hex, Nibbles};

#[test]
fn terminator_is_absorbed_into_the_leaf_flag() {
    let a = Nibbles::from_hex(vec![1, 2, 3, 16]);
    assert!(a.is_leaf());
    assert_eq!(a.as_slice(), &[1, 2, 3]);
    assert_eq!(a.len(), 4);
}

#[test]
fn from_bytes_unpacks_and_terminates() {
    let a = Nibbles::from_bytes(&[0xde, 0xad]);
    assert!(a.is_leaf());
    assert_eq!(a.as_slice(), &[0xd, 0xe, 0xa, 0xd]);
    // The unpacked form ends in the terminator again
    assert_eq!(a.into_vec(), vec![0xd, 0xe, 0xa, 0xd, 16]);
}

#[test]
fn from_raw_keeps_extension_paths_unterminated() {
    let a = Nibbles::from_raw(&[0x4f], false);
    assert!(!a.is_leaf());
    assert_eq!(a.len(), 2);
    assert_eq!(a.into_vec(), vec![4, 0xf]);
}

#[test]
fn at_exposes_the_terminator_position() {
    let a = Nibbles::from_bytes(&[0x90]);
    assert_eq!(a.at(0), 9);
    assert_eq!(a.at(1), 0);
    assert_eq!(a.at(2), 16);
}

#[test]
fn next_yields_data_then_terminator() {
    let mut a = Nibbles::from_bytes(&[0x3c]);
    assert_eq!(a.next(), Some(3));
    assert_eq!(a.next(), Some(0xc));
    assert_eq!(a.next(), Some(16));
    assert_eq!(a.next(), None);
    assert!(a.is_empty());
}

#[test]
fn next_choice_refuses_the_terminator() {
    let mut a = Nibbles::from_hex(vec![5, 16]);
    assert_eq!(a.next_choice(), Some(5));
    assert_eq!(a.next_choice(), None);
}

#[test]
fn skip_prefix_keeps_the_leaf_flag() {
    let mut a = Nibbles::from_bytes(&[0xab, 0xcd]);
    let run = Nibbles::from_raw(&[0xab], false);
    assert!(a.skip_prefix(&run));
    assert!(a.is_leaf());
    assert_eq!(a.as_slice(), &[0xc, 0xd]);

    // A diverging run leaves the path untouched
    let wrong = Nibbles::from_hex(vec![0xc, 0xc]);
    assert!(!a.skip_prefix(&wrong));
    assert_eq!(a.as_slice(), &[0xc, 0xd]);
}

#[test]
fn prefix_comparisons_ignore_the_leaf_flag() {
    let leaf = Nibbles::from_bytes(&[0x77]);
    let run = Nibbles::from_raw(&[0x77], false);
    // All data nibbles shared, terminator not counted
    assert_eq!(leaf.count_prefix(&run), 2);
    assert_eq!(leaf.compare_prefix(&run), Ordering::Equal);

    let diverging = Nibbles::from_hex(vec![7, 8]);
    assert_eq!(leaf.count_prefix(&diverging), 1);
    assert_eq!(leaf.compare_prefix(&diverging), Ordering::Less);
}

#[test]
fn slice_carries_the_flag_only_past_the_data() {
    let a = Nibbles::from_bytes(&[0x12, 0x34]);
    let head = a.slice(0, 2);
    assert!(!head.is_leaf());
    assert_eq!(head.as_slice(), &[1, 2]);

    let tail = a.offset(2);
    assert!(tail.is_leaf());
    assert_eq!(tail.into_vec(), vec![3, 4, 16]);

    // Offsetting everything away leaves just the terminator
    let end = a.offset(4);
    assert!(end.is_leaf());
    assert!(end.as_slice().is_empty());
    assert_eq!(end.len(), 1);
}

#[test]
fn extend_inherits_the_leaf_flag() {
    let mut run = Nibbles::from_raw(&[0x0a], false);
    let tail = Nibbles::from_hex(vec![0xb, 16]);
    run.extend(&tail);
    assert!(run.is_leaf());
    assert_eq!(run.as_slice(), &[0, 0xa, 0xb]);

    let joined = Nibbles::from_hex(vec![1]).concat(&Nibbles::from_hex(vec![2, 3]));
    assert!(!joined.is_leaf());
    assert_eq!(joined.as_slice(), &[1, 2, 3]);
}

#[test]
fn prepend_and_append_grow_the_data_nibbles() {
    let mut a = Nibbles::from_hex(vec![9, 16]);
    a.prepend(4);
    a.append(2);
    assert_eq!(a.as_slice(), &[4, 9, 2]);
    assert!(a.is_leaf());
    assert_eq!(a.append_new(7).as_slice(), &[4, 9, 2, 7]);
}

#[test]
fn compact_form_encodes_parity_and_kind() {
    // extension, odd: flag nibble 0x1 carries the first nibble
    assert_eq!(Nibbles::from_hex(vec![7]).encode_compact(), vec![0x17]);
    // extension, even: bare 0x00 prefix byte
    assert_eq!(
        Nibbles::from_hex(vec![0xa, 0xb]).encode_compact(),
        vec![0x00, 0xab]
    );
    // leaf, odd
    assert_eq!(Nibbles::from_hex(vec![7, 16]).encode_compact(), vec![0x37]);
    // leaf, even
    assert_eq!(
        Nibbles::from_hex(vec![0xa, 0xb, 16]).encode_compact(),
        vec![0x20, 0xab]
    );
}

#[test]
fn compact_form_roundtrips() {
    for hex in [
        vec![16],
        vec![0, 16],
        vec![0, 0, 5],
        vec![0xf, 0xe, 0xd, 16],
        vec![1, 2, 3, 4, 5],
    ] {
        let nibbles = Nibbles::from_hex(hex);
        let decoded = Nibbles::decode_compact(&nibbles.encode_compact());
        assert_eq!(decoded, nibbles);
        assert_eq!(decoded.is_leaf(), nibbles.is_leaf());
    }
}

#[test]
fn ordering_breaks_ties_on_the_leaf_flag() {
    let run = Nibbles::from_raw(&[0x42], false);
    let leaf = Nibbles::from_bytes(&[0x42]);
    assert!(run < leaf);

    // A strict data prefix sorts first regardless of flags
    let short = Nibbles::from_bytes(&[0x42]);
    let long = Nibbles::from_raw(&[0x42, 0x00], false);
    assert!(short < long);
}

#[test]
fn keybytes_conversions_roundtrip_with_odd_tails() {
    let hex = keybytes_to_hex(&[0x5a, 0x0f]);
    assert_eq!(hex, vec![5, 0xa, 0, 0xf, 16]);
    assert_eq!(hex_to_keybytes(&hex[..hex.len() - 1]), vec![0x5a, 0x0f]);

    // An odd nibble run packs into the high half of the last byte
    assert_eq!(hex_to_keybytes(&[5, 0xa, 0]), vec![0x5a, 0x00]);
}

#[test]
fn to_bytes_packs_whole_and_odd_lengths() {
    assert_eq!(Nibbles::from_hex(vec![0xc, 0x0, 0xf, 0xe]).to_bytes(), vec![0xc0, 0xfe]);
    assert_eq!(Nibbles::from_hex(vec![0xc, 0x0, 0xf]).to_bytes(), vec![0xc0, 0xf0]);
    assert!(Nibbles::default().to_bytes().is_empty());
}
