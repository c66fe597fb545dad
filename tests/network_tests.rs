//! Peer protocol tests: in-process message routing between nodes, and one run over real sockets

use consensus_node::network::{InvKind, Message, Node, Outbound, TxMessage};
use consensus_node::server::{self, Timeouts};
use consensus_node::transaction::{self, new_utxo_transaction};
use consensus_node::{Blockchain, UtxoSet, Wallet, BOOTSTRAP_ADDRESS};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TEST_BITS: u32 = 8;

struct TestNode {
    _dir: TempDir,
    node: Arc<Node>,
}

fn create_node(address: &str, bootstrap: &str, owner: &Wallet, mining: Option<&Wallet>) -> TestNode {
    let dir = TempDir::new().unwrap();
    let chain = Blockchain::create(dir.path().join("blockchain.db"), &owner.address(), TEST_BITS).unwrap();
    let utxo = Arc::new(UtxoSet::new(Arc::new(chain)).unwrap());
    utxo.reindex().unwrap();
    let node = Node::new(address, bootstrap, mining.map(|w| w.address()), utxo).unwrap();
    TestNode {
        _dir: dir,
        node: Arc::new(node),
    }
}

/// Deliver messages until the network goes quiet; messages to unknown addresses are dropped.
/// Returns every command delivered, in order.
fn route(nodes: &[&TestNode], initial: Vec<Outbound>) -> Vec<(String, &'static str)> {
    let by_address: HashMap<&str, &Node> = nodes.iter().map(|n| (n.node.address(), n.node.as_ref())).collect();
    let mut queue: VecDeque<Outbound> = initial.into();
    let mut delivered = Vec::new();

    while let Some(Outbound { to, message }) = queue.pop_front() {
        let Some(node) = by_address.get(to.as_str()) else {
            continue;
        };
        delivered.push((to.clone(), message.command()));
        // every message crosses the wire codec
        let message = Message::decode(&message.encode().unwrap()).unwrap();
        queue.extend(node.process_message(message).unwrap());
    }
    delivered
}

fn send_tx(from: &str, tx: &consensus_node::Transaction) -> Message {
    Message::Tx(TxMessage {
        addr_from: from.to_string(),
        transaction: transaction::serialize(tx).unwrap(),
    })
}

#[test]
fn test_new_node_syncs_from_bootstrap() {
    let hub_owner = Wallet::new();
    let hub = create_node(BOOTSTRAP_ADDRESS, BOOTSTRAP_ADDRESS, &hub_owner, None);
    let hub_chain = hub.node.utxo().blockchain();

    let alice = Wallet::new();
    let tx = new_utxo_transaction(&hub_owner, &alice.address(), 4, hub.node.utxo()).unwrap();
    hub.node.mine_transactions(&hub_owner.address(), vec![tx]).unwrap();
    hub.node.mine_transactions(&alice.address(), vec![]).unwrap();
    assert_eq!(hub_chain.best_height().unwrap(), 3);

    let joiner = create_node("localhost:3001", BOOTSTRAP_ADDRESS, &Wallet::new(), None);
    assert_eq!(joiner.node.utxo().blockchain().best_height().unwrap(), 1);

    let delivered = route(&[&hub, &joiner], joiner.node.handshake().unwrap());
    let commands: Vec<&str> = delivered.iter().map(|(_, c)| *c).collect();
    assert_eq!(
        commands,
        vec!["version", "version", "getblocks", "inv", "getdata", "block", "getdata", "block", "getdata", "block"]
    );

    let joined = joiner.node.utxo();
    assert_eq!(joined.blockchain().best_height().unwrap(), 3);
    assert_eq!(joined.blockchain().tip_hash(), hub_chain.tip_hash());
    assert_eq!(joined.snapshot().unwrap(), hub.node.utxo().snapshot().unwrap());
    assert_eq!(joined.balance(&alice.pub_key_hash()).unwrap(), 4 + 10);
    assert_eq!(joiner.node.blocks_in_transit(), 0);
    assert!(hub.node.known_peers().contains(&"localhost:3001".to_string()));
}

#[test]
fn test_resync_only_fetches_missing_blocks() {
    let hub_owner = Wallet::new();
    let hub = create_node(BOOTSTRAP_ADDRESS, BOOTSTRAP_ADDRESS, &hub_owner, None);
    hub.node.mine_transactions(&hub_owner.address(), vec![]).unwrap();
    let joiner = create_node("localhost:3001", BOOTSTRAP_ADDRESS, &Wallet::new(), None);
    route(&[&hub, &joiner], joiner.node.handshake().unwrap());
    assert_eq!(joiner.node.utxo().blockchain().best_height().unwrap(), 2);

    hub.node.mine_transactions(&hub_owner.address(), vec![]).unwrap();
    let delivered = route(&[&hub, &joiner], joiner.node.handshake().unwrap());
    let blocks = delivered.iter().filter(|(_, c)| *c == "block").count();
    assert_eq!(blocks, 1);
    assert_eq!(
        joiner.node.utxo().blockchain().tip_hash(),
        hub.node.utxo().blockchain().tip_hash()
    );
}

#[test]
fn test_transactions_flow_through_hub_to_miner() {
    let hub_owner = Wallet::new();
    let miner_wallet = Wallet::new();
    let hub = create_node(BOOTSTRAP_ADDRESS, BOOTSTRAP_ADDRESS, &hub_owner, None);
    let miner = create_node("localhost:3002", BOOTSTRAP_ADDRESS, &Wallet::new(), Some(&miner_wallet));
    let wallet_node = create_node("localhost:3001", BOOTSTRAP_ADDRESS, &Wallet::new(), None);

    // give a second wallet its own output so two independent spends exist
    let bob = Wallet::new();
    hub.node.mine_transactions(&bob.address(), vec![]).unwrap();

    // everyone converges on the hub's chain and the hub learns both peers
    route(&[&hub, &miner, &wallet_node], miner.node.handshake().unwrap());
    route(&[&hub, &miner, &wallet_node], wallet_node.node.handshake().unwrap());
    assert_eq!(miner.node.utxo().blockchain().best_height().unwrap(), 2);

    let carol = Wallet::new();
    let tx1 = new_utxo_transaction(&hub_owner, &carol.address(), 3, wallet_node.node.utxo()).unwrap();
    let tx2 = new_utxo_transaction(&bob, &carol.address(), 5, wallet_node.node.utxo()).unwrap();

    route(&[&hub, &miner, &wallet_node], wallet_node.node.send_transaction(&tx1).unwrap());
    assert!(miner.node.mempool_contains(&tx1.id));
    assert_eq!(miner.node.utxo().blockchain().best_height().unwrap(), 2);

    let delivered = route(&[&hub, &miner, &wallet_node], wallet_node.node.send_transaction(&tx2).unwrap());
    assert!(delivered.iter().any(|(to, c)| to == BOOTSTRAP_ADDRESS && *c == "inv"));

    let mined_chain = miner.node.utxo().blockchain();
    assert_eq!(mined_chain.best_height().unwrap(), 3);
    assert_eq!(miner.node.mempool_len(), 0);
    assert_eq!(miner.node.utxo().balance(&carol.pub_key_hash()).unwrap(), 8);
    assert_eq!(miner.node.utxo().balance(&miner_wallet.pub_key_hash()).unwrap(), 10);

    // the hub pulled the announced block
    assert_eq!(hub.node.utxo().blockchain().tip_hash(), mined_chain.tip_hash());
    assert_eq!(hub.node.utxo().balance(&carol.pub_key_hash()).unwrap(), 8);
}

#[test]
fn test_miner_skips_conflicting_spend() {
    let owner = Wallet::new();
    let miner_wallet = Wallet::new();
    let miner = create_node("localhost:3002", BOOTSTRAP_ADDRESS, &owner, Some(&miner_wallet));

    let x = Wallet::new();
    let y = Wallet::new();
    let to_x = new_utxo_transaction(&owner, &x.address(), 4, miner.node.utxo()).unwrap();
    let to_y = new_utxo_transaction(&owner, &y.address(), 5, miner.node.utxo()).unwrap();

    assert!(miner.node.process_message(send_tx(BOOTSTRAP_ADDRESS, &to_x)).unwrap().is_empty());
    let out = miner.node.process_message(send_tx(BOOTSTRAP_ADDRESS, &to_y)).unwrap();

    // one block announced to the bootstrap
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0].message, Message::Inv(inv) if inv.kind == InvKind::Block));

    let utxo = miner.node.utxo();
    assert_eq!(utxo.blockchain().best_height().unwrap(), 2);
    let paid = utxo.balance(&x.pub_key_hash()).unwrap() + utxo.balance(&y.pub_key_hash()).unwrap();
    assert!(paid == 4 || paid == 5);
    // the loser stays until the next round finds it unminable
    assert_eq!(miner.node.mempool_len(), 1);
}

#[test]
fn test_miner_drains_mempool() {
    let owner = Wallet::new();
    let miner_wallet = Wallet::new();
    let miner = create_node("localhost:3002", BOOTSTRAP_ADDRESS, &owner, Some(&miner_wallet));

    // four independent funded wallets
    let funded: Vec<Wallet> = (0..4).map(|_| Wallet::new()).collect();
    for wallet in &funded {
        miner.node.mine_transactions(&wallet.address(), vec![]).unwrap();
    }
    let start = miner.node.utxo().blockchain().best_height().unwrap();

    let sink = Wallet::new();
    let txs: Vec<_> = funded
        .iter()
        .map(|w| new_utxo_transaction(w, &sink.address(), 2, miner.node.utxo()).unwrap())
        .collect();

    // first one waits, the second triggers mining of everything pending
    for tx in &txs[..2] {
        miner.node.process_message(send_tx(BOOTSTRAP_ADDRESS, tx)).unwrap();
    }
    assert_eq!(miner.node.mempool_len(), 0);
    assert_eq!(miner.node.utxo().blockchain().best_height().unwrap(), start + 1);

    for tx in &txs[2..] {
        miner.node.process_message(send_tx(BOOTSTRAP_ADDRESS, tx)).unwrap();
    }
    assert_eq!(miner.node.mempool_len(), 0);
    assert_eq!(miner.node.utxo().balance(&sink.pub_key_hash()).unwrap(), 8);
}

#[test]
fn test_unreachable_peers_are_dropped_silently() {
    let hub_owner = Wallet::new();
    let hub = create_node(BOOTSTRAP_ADDRESS, BOOTSTRAP_ADDRESS, &hub_owner, None);
    hub.node
        .process_message(Message::Addr(consensus_node::network::AddrMessage {
            addr_list: vec!["localhost:3009".to_string()],
        }))
        .unwrap();

    let tx = new_utxo_transaction(&hub_owner, &Wallet::new().address(), 1, hub.node.utxo()).unwrap();
    let delivered = route(&[&hub], vec![Outbound {
        to: BOOTSTRAP_ADDRESS.to_string(),
        message: send_tx("localhost:3001", &tx),
    }]);
    assert_eq!(delivered.len(), 1);
    assert!(hub.node.mempool_contains(&tx.id));
    assert_eq!(hub.node.known_peers().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_over_tcp() {
    let hub_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hub_address = hub_listener.local_addr().unwrap().to_string();
    let joiner_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let joiner_address = joiner_listener.local_addr().unwrap().to_string();

    let hub_owner = Wallet::new();
    let hub = create_node(&hub_address, &hub_address, &hub_owner, None);
    hub.node.mine_transactions(&hub_owner.address(), vec![]).unwrap();
    let joiner = create_node(&joiner_address, &hub_address, &Wallet::new(), None);

    let timeouts = Timeouts {
        connect: Duration::from_secs(2),
        read: Duration::from_secs(5),
    };
    tokio::spawn(server::serve(hub_listener, hub.node.clone(), timeouts));
    tokio::spawn(server::serve(joiner_listener, joiner.node.clone(), timeouts));

    server::dispatch(joiner.node.handshake().unwrap(), timeouts).await;

    let target = hub.node.utxo().blockchain().tip_hash();
    let mut synced = false;
    for _ in 0..200 {
        if joiner.node.utxo().blockchain().tip_hash() == target && joiner.node.blocks_in_transit() == 0 {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(synced);
    assert_eq!(joiner.node.utxo().blockchain().best_height().unwrap(), 2);
}
