// evm-core/src/chain.rs

use crate::{block::BlockHeader, types::*, CoreResult};
use ethers_core::types::{Address, H256, U256};
use std::sync::Arc;

/// Number of ancestors visible to BLOCKHASH
pub const BLOCK_HASH_WINDOW: u64 = 256;

/// Consensus engine hooks the execution context needs
pub trait ConsensusEngine: Send + Sync {
    /// Account credited as the block author
    fn author(&self, header: &BlockHeader) -> CoreResult<Address>;
}

/// Read access to the chain the execution runs against
pub trait ChainContext: Send + Sync {
    /// Look up a header by hash and number
    fn header(&self, hash: &H256, number: BlockNumber) -> Option<BlockHeader>;

    /// Consensus engine, if any
    fn engine(&self) -> Option<&dyn ConsensusEngine>;
}

/// Chain stand-in that fabricates a linked run of headers.
///
/// Headers start at `genesis`, whose parent hash is zero; every later header
/// names the hash of the one before it. All headers share one timestamp,
/// read from the wall clock when the chain is built unless pinned.
#[derive(Debug, Clone)]
pub struct MockChain {
    coinbase: Address,
    gas_limit: Gas,
    timestamp: Timestamp,
    genesis: BlockNumber,
}

impl MockChain {
    pub fn new(coinbase: Address) -> Self {
        Self {
            coinbase,
            gas_limit: 1_000_000,
            timestamp: chrono::Utc::now().timestamp().max(0) as Timestamp,
            genesis: 0,
        }
    }

    /// Pin header timestamps instead of reading the wall clock
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: Gas) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Start the chain at `genesis`; lower numbers have no header
    pub fn with_genesis(mut self, genesis: BlockNumber) -> Self {
        self.genesis = genesis;
        self
    }

    fn build(&self, parent_hash: H256, number: BlockNumber) -> BlockHeader {
        BlockHeader {
            parent_hash,
            coinbase: self.coinbase,
            difficulty: U256::one(),
            number,
            gas_limit: self.gas_limit,
            gas_used: 0,
            timestamp: self.timestamp,
            extra_data: Vec::new(),
        }
    }
}

impl ChainContext for MockChain {
    fn header(&self, _hash: &H256, number: BlockNumber) -> Option<BlockHeader> {
        if number < self.genesis {
            return None;
        }

        let mut header = self.build(H256::zero(), self.genesis);
        for n in self.genesis + 1..=number {
            header = self.build(header.hash(), n);
        }
        Some(header)
    }

    fn engine(&self) -> Option<&dyn ConsensusEngine> {
        None
    }
}

/// Block-level environment of an execution
#[derive(Clone)]
pub struct BlockContext {
    pub coinbase: Address,
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub difficulty: U256,
    pub gas_limit: Gas,
    parent_hash: H256,
    chain: Arc<dyn ChainContext>,
}

impl BlockContext {
    /// Build the context for executing on top of `header`.
    ///
    /// The coinbase is `author` when given, otherwise the consensus engine's
    /// author, otherwise the header's coinbase.
    pub fn new(
        header: &BlockHeader,
        chain: Arc<dyn ChainContext>,
        author: Option<Address>,
    ) -> CoreResult<Self> {
        let coinbase = match author {
            Some(author) => author,
            None => match chain.engine() {
                Some(engine) => engine.author(header)?,
                None => header.coinbase,
            },
        };

        tracing::debug!(number = header.number, ?coinbase, "built block context");

        Ok(Self {
            coinbase,
            number: header.number,
            timestamp: header.timestamp,
            difficulty: header.difficulty,
            gas_limit: header.gas_limit,
            parent_hash: header.parent_hash,
            chain,
        })
    }

    /// Hash of ancestor `number`, zero outside the 256-block window
    pub fn block_hash(&self, number: BlockNumber) -> H256 {
        if number >= self.number || self.number - number > BLOCK_HASH_WINDOW {
            return H256::zero();
        }

        let mut hash = self.parent_hash;
        let mut current = self.number - 1;
        loop {
            let header = match self.chain.header(&hash, current) {
                Some(header) => header,
                None => return H256::zero(),
            };
            if current == number {
                return header.hash();
            }
            hash = header.parent_hash;
            current -= 1;
        }
    }
}

impl std::fmt::Debug for BlockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockContext")
            .field("coinbase", &self.coinbase)
            .field("number", &self.number)
            .field("timestamp", &self.timestamp)
            .field("difficulty", &self.difficulty)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bytes_to_address;

    struct FixedAuthor(Address);

    impl ConsensusEngine for FixedAuthor {
        fn author(&self, _header: &BlockHeader) -> CoreResult<Address> {
            Ok(self.0)
        }
    }

    struct EngineChain(MockChain, FixedAuthor);

    impl ChainContext for EngineChain {
        fn header(&self, hash: &H256, number: BlockNumber) -> Option<BlockHeader> {
            self.0.header(hash, number)
        }

        fn engine(&self) -> Option<&dyn ConsensusEngine> {
            Some(&self.1)
        }
    }

    #[test]
    fn test_mock_header() {
        let coinbase = bytes_to_address(b"xujingshi");
        let chain = MockChain::new(coinbase)
            .with_timestamp(42)
            .with_genesis(7_280_000);
        let header = chain.header(&H256::zero(), 7_280_001).unwrap();

        assert_eq!(header.coinbase, coinbase);
        assert_eq!(header.number, 7_280_001);
        assert_eq!(header.difficulty, U256::one());
        assert_eq!(header.gas_limit, 1_000_000);
        assert_eq!(header.timestamp, 42);
        assert!(chain.engine().is_none());
        assert!(chain.header(&H256::zero(), 7_279_999).is_none());
    }

    #[test]
    fn test_headers_link_to_their_parents() {
        let chain = MockChain::new(Address::zero()).with_genesis(10);
        let genesis = chain.header(&H256::zero(), 10).unwrap();
        assert_eq!(genesis.parent_hash, H256::zero());

        for number in 11..20 {
            let header = chain.header(&H256::zero(), number).unwrap();
            let parent = chain.header(&H256::zero(), number - 1).unwrap();
            assert_eq!(header.parent_hash, parent.hash());
            assert_eq!(header.timestamp, parent.timestamp);
        }

        // BLOCKHASH resolves to the same hashes the headers link through
        let head = chain.header(&H256::zero(), 20).unwrap();
        let ctx = BlockContext::new(&head, Arc::new(chain.clone()), None).unwrap();
        assert_eq!(ctx.block_hash(19), head.parent_hash);
        assert_eq!(ctx.block_hash(10), genesis.hash());
        assert_eq!(ctx.block_hash(9), H256::zero());
    }

    #[test]
    fn test_coinbase_resolution() {
        let header_coinbase = bytes_to_address(b"header");
        let engine_author = bytes_to_address(b"engine");
        let explicit = bytes_to_address(b"explicit");

        let chain = MockChain::new(header_coinbase).with_timestamp(1);
        let header = chain.header(&H256::zero(), 10).unwrap();

        let ctx = BlockContext::new(&header, Arc::new(chain.clone()), None).unwrap();
        assert_eq!(ctx.coinbase, header_coinbase);

        let ctx = BlockContext::new(&header, Arc::new(chain.clone()), Some(explicit)).unwrap();
        assert_eq!(ctx.coinbase, explicit);

        let engine_chain = EngineChain(chain, FixedAuthor(engine_author));
        let ctx = BlockContext::new(&header, Arc::new(engine_chain), None).unwrap();
        assert_eq!(ctx.coinbase, engine_author);
    }

    #[test]
    fn test_block_hash_window() {
        let chain = MockChain::new(Address::zero()).with_timestamp(1).with_genesis(600);
        let header = chain.header(&H256::zero(), 1000).unwrap();
        let ctx = BlockContext::new(&header, Arc::new(chain.clone()), None).unwrap();

        assert_eq!(ctx.block_hash(1000), H256::zero());
        assert_eq!(ctx.block_hash(1001), H256::zero());
        assert_eq!(ctx.block_hash(1000 - 257), H256::zero());

        let expected = chain.header(&H256::zero(), 999).unwrap().hash();
        assert_eq!(ctx.block_hash(999), expected);
        assert_ne!(ctx.block_hash(744), H256::zero());
    }
}
