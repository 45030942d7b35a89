strong_type!(ChainId, u64);
strong_type!(RecordIndex, u64);
strong_type!(TxId, u64);
