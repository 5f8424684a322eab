use crate::config::SHANNONS_PER_CKB;

/// Render shannons as CKB with all eight decimals, e.g. `61.00000000`.
pub fn format_ckb(shannons: u64) -> String {
	format!(
		"{}.{:08}",
		shannons / SHANNONS_PER_CKB,
		shannons % SHANNONS_PER_CKB
	)
}

/// Signed variant for balance changes, e.g. `+1.50000000` or `-0.00001000`.
pub fn format_shannons_delta(delta: i128) -> String {
	let sign = if delta < 0 { "-" } else { "+" };
	let magnitude = delta.unsigned_abs();
	let per_ckb = SHANNONS_PER_CKB as u128;
	format!("{}{}.{:08}", sign, magnitude / per_ckb, magnitude % per_ckb)
}
