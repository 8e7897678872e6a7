use concord::{ByteSpanMut, ConcordConfig, DataType};

use super::helpers::{check_broadcast, run_collective, run_group, seeded};

#[tokio::test]
async fn test_broadcast_default_config_4_ranks() {
    run_collective(4, |colls, comm| async move {
        let rank = comm.rank();
        let mut data: Vec<f32> = if rank == 0 {
            vec![1.5, -2.0, 3.25]
        } else {
            vec![0.0; 3]
        };
        colls
            .broadcast(&comm, ByteSpanMut::of(&mut data), 0)
            .await
            .unwrap();
        assert_eq!(data, vec![1.5, -2.0, 3.25], "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_broadcast_strided_receive_buffer() {
    run_collective(3, |colls, comm| async move {
        let rank = comm.rank();
        // Elements every 8 bytes in a 4-byte-element buffer.
        let mut raw = vec![0u8; 4 * 8];
        if rank == 0 {
            for (i, v) in [7i32, 8, 9, 10].iter().enumerate() {
                raw[i * 8..i * 8 + 4].copy_from_slice(&v.to_le_bytes());
            }
        }
        let span = ByteSpanMut::strided(&mut raw, 4, DataType::I32, 8).unwrap();
        colls.broadcast(&comm, span, 0).await.unwrap();
        for (i, v) in [7i32, 8, 9, 10].iter().enumerate() {
            let got = i32::from_le_bytes(raw[i * 8..i * 8 + 4].try_into().unwrap());
            assert_eq!(got, *v, "rank {rank} element {i}");
        }
    })
    .await;
}

#[tokio::test]
async fn test_pipelined_broadcast_many_segments() {
    // Segment size far below the payload forces a deep pipeline.
    let config = ConcordConfig {
        broadcast: "flat-pipelined".into(),
        pipeline_segment_bytes: 16,
        ..ConcordConfig::default()
    };
    run_group(5, config, |colls, comm| async move {
        let rank = comm.rank();
        let count = 133usize;
        let mut data: Vec<i32> = if rank == 2 {
            (0..count).map(|i| seeded(2, i)).collect()
        } else {
            vec![0; count]
        };
        colls
            .broadcast(&comm, ByteSpanMut::of(&mut data), 2)
            .await
            .unwrap();
        let expected: Vec<i32> = (0..count).map(|i| seeded(2, i)).collect();
        assert_eq!(data, expected, "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_smp_broadcast_group_size_variants() {
    for group_size in [1u32, 2, 3, 8] {
        let config = ConcordConfig {
            broadcast: "smp-binomial".into(),
            smp_group_size: group_size,
            ..ConcordConfig::default()
        };
        run_group(7, config, move |colls, comm| async move {
            let rank = comm.rank();
            let mut data: Vec<i64> = if rank == 3 {
                vec![41, -42, 43]
            } else {
                vec![0; 3]
            };
            colls
                .broadcast(&comm, ByteSpanMut::of(&mut data), 3)
                .await
                .unwrap();
            assert_eq!(data, vec![41, -42, 43], "group_size {group_size} rank {rank}");
        })
        .await;
    }
}

#[tokio::test]
async fn test_arrival_pattern_aware_staggered_arrivals() {
    // Delay some ranks so the root observes a non-trivial arrival
    // pattern; the payload must still reach everyone intact.
    check_broadcast("arrival-pattern-aware", 8, 512, 0).await;

    let config = ConcordConfig {
        broadcast: "arrival-pattern-aware".into(),
        ..ConcordConfig::default()
    };
    run_group(6, config, |colls, comm| async move {
        let rank = comm.rank();
        for _ in 0..(rank % 3) * 5 {
            tokio::task::yield_now().await;
        }
        let mut data: Vec<u8> = if rank == 0 {
            (0..64).collect()
        } else {
            vec![0; 64]
        };
        colls
            .broadcast(&comm, ByteSpanMut::of(&mut data), 0)
            .await
            .unwrap();
        let expected: Vec<u8> = (0..64).collect();
        assert_eq!(data, expected, "rank {rank}");
    })
    .await;
}
