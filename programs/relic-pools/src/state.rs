use anchor_lang::prelude::*;

/// A collection-scoped funding pool. The pool's balance is simply the PDA's
/// lamports; anyone can top it up with a plain transfer.
#[account]
pub struct Pool {
    /// The verified collection this pool lends against
    pub collection: Pubkey,
    /// The owner of the pool
    pub authority: Pubkey,
    /// The fixed amount offered per loan
    pub floor_price: u64,
    /// Annualized return
    pub basis_points: u32,
    /// Misc
    pub bump: u8,
}

impl Pool {
    pub const PREFIX: &'static [u8] = b"pool";

    pub fn space() -> usize {
        8 + // discriminator
        32 + // collection
        32 + // authority
        8 + // floor_price
        4 + // basis_points
        1 // bump
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolLoanState {
    Active,
    Repaid,
}

/// A loan originated from a pool at its posted floor price. The collateral
/// sits in a program-held escrow token account until repayment.
#[account]
pub struct PoolLoan {
    /// Current lifecycle state
    pub state: PoolLoanState,
    /// Principal in lamports
    pub amount: u64,
    /// Annualized return, copied from the pool at origination
    pub basis_points: u32,
    /// The NFT holder
    pub borrower: Pubkey,
    /// The originating pool
    pub pool: Pubkey,
    /// The mint of the collateral token
    pub mint: Pubkey,
    /// Set at origination
    pub start_date: i64,
    /// Misc
    pub bump: u8,
    pub escrow_bump: u8,
}

impl PoolLoan {
    pub const PREFIX: &'static [u8] = b"loan";
    pub const ESCROW_PREFIX: &'static [u8] = b"escrow";

    pub fn space() -> usize {
        8 + // discriminator
        1 + // state
        8 + // amount
        4 + // basis_points
        32 + // borrower
        32 + // pool
        32 + // mint
        8 + // start_date
        1 + // bump
        1 // escrow_bump
    }

    /// Active -> Repaid.
    pub fn mark_repaid(&mut self) -> Result<()> {
        match self.state {
            PoolLoanState::Active => {
                self.state = PoolLoanState::Repaid;
                Ok(())
            }
            _ => err!(PoolError::InvalidState),
        }
    }
}

#[error_code]
pub enum PoolError {
    #[msg("Insufficient funds in pool")]
    PoolInsufficientFunds,
    #[msg("Invalid collection")]
    InvalidCollection,
    #[msg("Collection undefined")]
    CollectionUndefined,
    #[msg("Invalid mint")]
    InvalidMint,
    #[msg("Metadata doesnt exist")]
    MetadataDoesntExist,
    #[msg("Derived key invalid")]
    DerivedKeyInvalid,
    #[msg("Invalid state")]
    InvalidState,
    #[msg("Numerical overflow")]
    NumericalOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_loan_repay_is_single_shot() {
        let mut loan = PoolLoan {
            state: PoolLoanState::Active,
            amount: 1_000_000,
            basis_points: 500,
            borrower: Pubkey::new_unique(),
            pool: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            start_date: 0,
            bump: 255,
            escrow_bump: 254,
        };
        loan.mark_repaid().unwrap();
        assert_eq!(loan.state, PoolLoanState::Repaid);
        assert!(loan.mark_repaid().is_err());
    }

    #[test]
    fn account_sizes_cover_serialized_fields() {
        assert_eq!(Pool::space(), 8 + 32 + 32 + 8 + 4 + 1);
        assert_eq!(PoolLoan::space(), 8 + 1 + 8 + 4 + 32 + 32 + 32 + 8 + 1 + 1);
    }
}
