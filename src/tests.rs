// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests exercising accounts, pairwise sessions and group sessions together through
//! the public API.
use crate::cipher::CipherError;
use crate::crypto::Rng;
use crate::olm::ratchet::MAX_RECEIVER_CHAINS;
use crate::{
    Account, InboundGroupSession, MessageType, OlmMessage, OutboundGroupSession, RatchetError,
    Session, SessionError,
};

const PICKLE_KEY: &[u8] = b"a very secret pickle key";

/// Creates Alice's and Bob's accounts plus an established session pair between them.
fn conversation(rng: &Rng) -> (Session, Session) {
    let alice_account = Account::new(rng).unwrap();
    let mut bob_account = Account::new(rng).unwrap();
    bob_account.generate_one_time_keys(1, rng).unwrap();
    let one_time_key = bob_account.one_time_keys().next().unwrap().public_key();

    let mut alice = Session::new_outbound(
        &alice_account,
        &bob_account.curve25519_key(),
        &one_time_key,
        rng,
    )
    .unwrap();

    let message = alice.encrypt(b"hello", rng).unwrap();
    let OlmMessage::PreKey(prekey_bytes) = &message else {
        panic!("first message must use pre-key framing");
    };

    let mut bob = Session::new_inbound(
        &bob_account,
        Some(&alice_account.curve25519_key()),
        prekey_bytes,
    )
    .unwrap();
    assert_eq!(bob.decrypt(&message).unwrap(), b"hello");

    // The one-time key did it's job and is retired.
    assert!(bob_account.remove_one_time_key(&one_time_key));

    (alice, bob)
}

#[test]
fn long_conversation_round_trip() {
    let rng = Rng::from_seed([11; 32]);
    let (mut alice, mut bob) = conversation(&rng);

    // Alternate direction every round, with a couple of same-direction bursts.
    for round in 0u32..8 {
        for burst in 0..(round % 3 + 1) {
            let plaintext = format!("alice round {round} burst {burst}");
            let message = alice.encrypt(plaintext.as_bytes(), &rng).unwrap();
            assert_eq!(bob.decrypt(&message).unwrap(), plaintext.as_bytes());
        }
        for burst in 0..(round % 2 + 1) {
            let plaintext = format!("bob round {round} burst {burst}");
            let message = bob.encrypt(plaintext.as_bytes(), &rng).unwrap();
            assert_eq!(alice.decrypt(&message).unwrap(), plaintext.as_bytes());
        }
    }
}

#[test]
fn out_of_order_across_sessions() {
    let rng = Rng::from_seed([12; 32]);
    let (mut alice, mut bob) = conversation(&rng);

    let messages: Vec<(String, OlmMessage)> = (0..6)
        .map(|i| {
            let plaintext = format!("message {i}");
            let message = alice.encrypt(plaintext.as_bytes(), &rng).unwrap();
            (plaintext, message)
        })
        .collect();

    // A fixed shuffle of the delivery order.
    for index in [3, 0, 5, 1, 4, 2] {
        let (plaintext, message) = &messages[index];
        assert_eq!(bob.decrypt(message).unwrap(), plaintext.as_bytes());
    }
}

#[test]
fn historic_receiver_chains_are_bounded() {
    let rng = Rng::from_seed([13; 32]);
    let (mut alice, mut bob) = conversation(&rng);

    // Hold back one message from Alice's current sending chain.
    let held_back = alice.encrypt(b"held back", &rng).unwrap();

    // Each full round trip afterwards rotates the ratchet into a new epoch.
    for epoch in 0..MAX_RECEIVER_CHAINS - 1 {
        let message = alice
            .encrypt(format!("alice epoch {epoch}").as_bytes(), &rng)
            .unwrap();
        bob.decrypt(&message).unwrap();
        let reply = bob
            .encrypt(format!("bob epoch {epoch}").as_bytes(), &rng)
            .unwrap();
        alice.decrypt(&reply).unwrap();
    }

    // The held back message is from the oldest retained chain and still decrypts.
    assert_eq!(bob.decrypt(&held_back).unwrap(), b"held back");

    // Hold back another message, then rotate until it's chain fell out of the bounded history.
    let held_back = alice.encrypt(b"held back again", &rng).unwrap();
    for epoch in 0..=MAX_RECEIVER_CHAINS {
        let message = alice
            .encrypt(format!("alice late epoch {epoch}").as_bytes(), &rng)
            .unwrap();
        bob.decrypt(&message).unwrap();
        let reply = bob
            .encrypt(format!("bob late epoch {epoch}").as_bytes(), &rng)
            .unwrap();
        alice.decrypt(&reply).unwrap();
    }

    // Flush it's retained message key out of the bounded skipped-key cache as well.
    for _ in 0..crate::olm::ratchet::MAX_SKIPPED_MESSAGE_KEYS + 1 {
        alice.encrypt(b"dropped by the network", &rng).unwrap();
    }
    let flush = alice.encrypt(b"flush", &rng).unwrap();
    assert_eq!(bob.decrypt(&flush).unwrap(), b"flush");

    // Neither the chain nor a cached key remain; the message is undecryptable.
    assert!(bob.decrypt(&held_back).is_err());
}

#[test]
fn forged_messages_leave_state_untouched() {
    let rng = Rng::from_seed([14; 32]);
    let (mut alice, mut bob) = conversation(&rng);

    let mut message = alice.encrypt(b"genuine", &rng).unwrap();
    let OlmMessage::Normal(bytes) = &mut message else {
        panic!("established sessions use normal framing");
    };
    let position = bytes.len() - 20;
    bytes[position] ^= 0x40;

    let before = bob.pickle(PICKLE_KEY);
    assert!(matches!(
        bob.decrypt(&message),
        Err(SessionError::Ratchet(RatchetError::Cipher(
            CipherError::BadMessageMac
        )))
    ));

    // Encrypting after the rejected decrypt produces the same bytes as if the rejection never
    // happened: the whole session state is unchanged.
    assert_eq!(bob.pickle(PICKLE_KEY), before);
}

#[test]
fn prekey_message_with_zero_keys_parses_but_fails_authentication() {
    let rng = Rng::from_seed([15; 32]);
    let (mut alice, mut bob) = conversation(&rng);

    // Complete a round trip so Bob holds a sending chain to ratchet against.
    let reply = bob.encrypt(b"ack", &rng).unwrap();
    alice.decrypt(&reply).unwrap();

    // A syntactically valid pre-key message: all-zero handshake keys wrapped around a minimal
    // inner message with an all-zero MAC.
    let zero_key = crate::Curve25519PublicKey::from_bytes([0; 32]);
    let mut inner = crate::olm::message::encode_message(&zero_key, 0, &[0; 16]);
    inner.extend_from_slice(&[0; 8]);
    let forged = crate::olm::message::encode_prekey_message(&zero_key, &zero_key, &zero_key, &inner);

    // It decodes, so it can be checked against existing sessions, but it matches nothing.
    assert!(!bob.matches_inbound_session(None, &forged));

    // Decrypting it fails authentication without corrupting the session.
    let before = bob.pickle(PICKLE_KEY);
    assert!(bob.decrypt(&OlmMessage::PreKey(forged)).is_err());
    assert_eq!(bob.pickle(PICKLE_KEY), before);
}

#[test]
fn sessions_are_independent() {
    let rng = Rng::from_seed([16; 32]);

    let alice_account = Account::new(&rng).unwrap();
    let mut bob_account = Account::new(&rng).unwrap();
    bob_account.generate_one_time_keys(2, &rng).unwrap();
    let one_time_keys: Vec<_> = bob_account
        .one_time_keys()
        .map(|key| key.public_key())
        .collect();

    // Two outbound sessions against different one-time keys have different identifiers and
    // their messages are not interchangeable.
    let mut first = Session::new_outbound(
        &alice_account,
        &bob_account.curve25519_key(),
        &one_time_keys[0],
        &rng,
    )
    .unwrap();
    let mut second = Session::new_outbound(
        &alice_account,
        &bob_account.curve25519_key(),
        &one_time_keys[1],
        &rng,
    )
    .unwrap();
    assert_ne!(first.session_id(), second.session_id());

    let first_message = first.encrypt(b"for the first session", &rng).unwrap();
    let OlmMessage::PreKey(first_bytes) = &first_message else {
        panic!("first message must use pre-key framing");
    };
    let second_message = second.encrypt(b"for the second session", &rng).unwrap();
    let OlmMessage::PreKey(second_bytes) = &second_message else {
        panic!("first message must use pre-key framing");
    };

    let mut bob_first = Session::new_inbound(&bob_account, None, first_bytes).unwrap();
    assert!(bob_first.matches_inbound_session(None, first_bytes));
    assert!(!bob_first.matches_inbound_session(None, second_bytes));

    assert!(bob_first.decrypt(&second_message).is_err());
    assert_eq!(
        bob_first.decrypt(&first_message).unwrap(),
        b"for the first session"
    );
}

#[test]
fn group_fanout_through_pairwise_sessions() {
    let rng = Rng::from_seed([17; 32]);

    // The group sender shares it's session key with one member over an established pairwise
    // session, the usual composition of the two schemes.
    let (mut sender, mut member) = conversation(&rng);
    let mut group = OutboundGroupSession::new(&rng).unwrap();

    let session_key = group.session_key();
    let shared = sender.encrypt(session_key.as_bytes(), &rng).unwrap();
    let received_key = member.decrypt(&shared).unwrap();

    let mut inbound = InboundGroupSession::new(std::str::from_utf8(&received_key).unwrap()).unwrap();
    assert_eq!(inbound.session_id(), group.session_id());

    let message = group.encrypt(b"hello, everyone");
    let decrypted = inbound.decrypt(&message).unwrap();
    assert_eq!(decrypted.plaintext, b"hello, everyone");
    assert_eq!(decrypted.message_index, 0);
}

#[test]
fn message_type_stays_normal_after_establishment() {
    let rng = Rng::from_seed([18; 32]);
    let (mut alice, mut bob) = conversation(&rng);

    assert_eq!(bob.encrypt_message_type(), MessageType::Normal);

    // Alice has not yet received anything, she is still in the pre-key phase.
    assert_eq!(alice.encrypt_message_type(), MessageType::PreKey);
    let reply = bob.encrypt(b"ack", &rng).unwrap();
    alice.decrypt(&reply).unwrap();
    assert_eq!(alice.encrypt_message_type(), MessageType::Normal);

    // The transition is monotonic, later traffic never flips it back.
    let message = alice.encrypt(b"onwards", &rng).unwrap();
    assert_eq!(message.message_type(), MessageType::Normal);
    bob.decrypt(&message).unwrap();
    assert_eq!(alice.encrypt_message_type(), MessageType::Normal);
}
