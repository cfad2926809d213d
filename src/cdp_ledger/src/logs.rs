use ic_canister_log::declare_log_buffer;

// High-priority messages: liquidations, redemptions, position lifecycle.
declare_log_buffer!(name = INFO, capacity = 1000);

// Low-priority messages: per-position walk details, fee recomputation.
declare_log_buffer!(name = DEBUG, capacity = 1000);
