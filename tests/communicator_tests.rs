use box_halo::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};

#[test]
fn rayon_round_trip() {
    let tag = CommTag(0x1000);
    let world = RayonComm::world(2);

    let msg = b"hello";
    let _s = world[0].isend(1, tag.base(), msg);

    let h = world[1].irecv(0, tag.base(), msg.len());
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn rayon_fifo_order() {
    let tag = CommTag(0x1001);
    let world = RayonComm::world(2);

    for i in 0..10u8 {
        let _ = world[0].isend(1, tag.base(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let h = world[1].irecv(0, tag.base(), 1);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn oversized_messages_arrive_whole() {
    let tag = CommTag(0x1002);
    let world = RayonComm::world(2);

    let _ = world[0].isend(1, tag.base(), &[1, 2, 3, 4, 5, 6]);
    let h = world[1].irecv(0, tag.base(), 4);
    assert_eq!(h.wait().unwrap(), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn every_rank_draws_the_same_tag_sequence() {
    let world = RayonComm::world(3);
    let seqs: Vec<Vec<CommTag>> = world
        .iter()
        .map(|c| (0..4).map(|_| c.next_tag()).collect())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] == w[1]));
    let serial = NoComm::default();
    assert_eq!(serial.next_tag(), seqs[0][0]);
}

#[test]
fn commtag_round_trip() {
    let val = 0xABCD;
    let tag = CommTag::new(val);
    assert_eq!(tag.as_u16(), val);
}
