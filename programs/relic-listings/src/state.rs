use anchor_lang::prelude::*;

use crate::SECONDS_PER_DAY;

/// Instrument kinds that can hold custody of a deposited NFT.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentKind {
    Loan,
    CallOption,
    Hire,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstrumentFlags {
    pub loan: bool,
    pub call_option: bool,
    pub hire: bool,
}

/// Per (mint, owner) registry of which instruments currently hold custody.
/// The registry PDA is also the token delegate, so it carries the mint and
/// authority keys needed to rebuild its signer seeds.
#[account]
pub struct InstrumentRegistry {
    pub mint: Pubkey,
    pub authority: Pubkey,
    pub flags: InstrumentFlags,
    pub bump: u8,
}

impl InstrumentRegistry {
    pub const PREFIX: &'static [u8] = b"token_manager";

    pub fn space() -> usize {
        8 + // discriminator
        32 + // mint
        32 + // authority
        3 + // flags
        1 // bump
    }

    /// Toggles one custody flag, enforcing the conflict matrix:
    /// loan and call_option are mutually exclusive, and hire can coexist
    /// with loan but never with call_option.
    pub fn set_flag(&mut self, kind: InstrumentKind, value: bool) -> Result<()> {
        if value {
            let conflict = match kind {
                InstrumentKind::Loan => self.flags.call_option,
                InstrumentKind::CallOption => self.flags.loan || self.flags.hire,
                InstrumentKind::Hire => self.flags.call_option,
            };
            require!(!conflict, ListingsError::ConflictingInstrument);
        }

        match kind {
            InstrumentKind::Loan => self.flags.loan = value,
            InstrumentKind::CallOption => self.flags.call_option = value,
            InstrumentKind::Hire => self.flags.hire = value,
        }

        Ok(())
    }

    /// True when no instrument holds custody and the deposit account
    /// should be thawed and undelegated.
    pub fn is_clear(&self) -> bool {
        !self.flags.loan && !self.flags.call_option && !self.flags.hire
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoanState {
    Listed,
    Active,
    Repaid,
    Defaulted,
}

#[account]
pub struct Loan {
    /// Current lifecycle state
    pub state: LoanState,
    /// Principal in lamports
    pub amount: u64,
    /// The NFT holder
    pub borrower: Pubkey,
    /// The issuer of the loan
    pub lender: Pubkey,
    /// Annualized return
    pub basis_points: u32,
    /// Duration of the loan in seconds
    pub duration: i64,
    /// Set when the loan is given
    pub start_date: i64,
    /// The mint of the collateral token
    pub mint: Pubkey,
    /// Misc
    pub padding: [u8; 64],
    pub bump: u8,
}

impl Loan {
    pub const PREFIX: &'static [u8] = b"loan";

    pub fn space() -> usize {
        8 + // discriminator
        1 + // state
        8 + // amount
        32 + // borrower
        32 + // lender
        4 + // basis_points
        8 + // duration
        8 + // start_date
        32 + // mint
        64 + // padding
        1 // bump
    }

    /// Listed -> Active. Records the lender and starts the clock.
    pub fn activate(&mut self, lender: Pubkey, unix_timestamp: i64) -> Result<()> {
        match self.state {
            LoanState::Listed => {
                self.state = LoanState::Active;
                self.lender = lender;
                self.start_date = unix_timestamp;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    /// Active -> Repaid.
    pub fn mark_repaid(&mut self) -> Result<()> {
        match self.state {
            LoanState::Active => {
                self.state = LoanState::Repaid;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    /// Active -> Defaulted, strictly after the duration has elapsed.
    pub fn mark_defaulted(&mut self, unix_timestamp: i64) -> Result<()> {
        match self.state {
            LoanState::Active => {
                require!(self.is_overdue(unix_timestamp), ListingsError::NotOverdue);
                self.state = LoanState::Defaulted;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    pub fn is_overdue(&self, unix_timestamp: i64) -> bool {
        unix_timestamp > self.start_date.saturating_add(self.duration)
    }

    /// Closing reclaims rent and is only valid once no value is outstanding.
    pub fn assert_closable(&self) -> Result<()> {
        match self.state {
            LoanState::Listed | LoanState::Repaid | LoanState::Defaulted => Ok(()),
            LoanState::Active => err!(ListingsError::InvalidState),
        }
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOptionState {
    Listed,
    Active,
    Exercised,
}

#[account]
pub struct CallOption {
    /// Current lifecycle state
    pub state: CallOptionState,
    /// The option premium in lamports
    pub amount: u64,
    /// The issuer of the call option
    pub seller: Pubkey,
    /// The holder of the call option
    pub buyer: Pubkey,
    /// Last date the option can be exercised
    pub expiry: i64,
    /// Price paid to the seller on exercise
    pub strike_price: u64,
    /// The mint of the underlying token
    pub mint: Pubkey,
    /// Misc
    pub padding: [u8; 64],
    pub bump: u8,
}

impl CallOption {
    pub const PREFIX: &'static [u8] = b"call_option";

    pub fn space() -> usize {
        8 + // discriminator
        1 + // state
        8 + // amount
        32 + // seller
        32 + // buyer
        8 + // expiry
        8 + // strike_price
        32 + // mint
        64 + // padding
        1 // bump
    }

    /// Listed -> Active. Records the buyer; the premium transfer is the
    /// caller's responsibility and commits in the same transaction.
    pub fn purchase(&mut self, buyer: Pubkey) -> Result<()> {
        match self.state {
            CallOptionState::Listed => {
                self.state = CallOptionState::Active;
                self.buyer = buyer;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    /// Active -> Exercised, only at or before expiry.
    pub fn exercise(&mut self, unix_timestamp: i64) -> Result<()> {
        match self.state {
            CallOptionState::Active => {
                require!(unix_timestamp <= self.expiry, ListingsError::OptionExpired);
                self.state = CallOptionState::Exercised;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    /// Listed and Exercised options close freely; an Active option can
    /// only be closed once it has expired.
    pub fn assert_closable(&self, unix_timestamp: i64) -> Result<()> {
        match self.state {
            CallOptionState::Listed | CallOptionState::Exercised => Ok(()),
            CallOptionState::Active => {
                require!(unix_timestamp > self.expiry, ListingsError::OptionNotExpired);
                Ok(())
            }
        }
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HireState {
    Listed,
    Hired,
}

#[account]
pub struct Hire {
    /// Current lifecycle state
    pub state: HireState,
    /// The daily rate in lamports
    pub amount: u64,
    /// The NFT owner
    pub lender: Pubkey,
    /// The current or designated renter. None means anyone can take it.
    pub borrower: Option<Pubkey>,
    /// The latest date this listing can run to
    pub expiry: i64,
    /// Start of the current term
    pub current_start: Option<i64>,
    /// End of the current term
    pub current_expiry: Option<i64>,
    /// Prepaid fees held in the hire escrow
    pub escrow_balance: u64,
    /// The mint of the hired token
    pub mint: Pubkey,
    /// Misc
    pub bump: u8,
}

impl Hire {
    pub const PREFIX: &'static [u8] = b"hire";
    pub const ESCROW_PREFIX: &'static [u8] = b"escrow";

    pub fn space() -> usize {
        8 + // discriminator
        1 + // state
        8 + // amount
        32 + // lender
        (1 + 32) + // borrower
        8 + // expiry
        (1 + 8) + // current_start
        (1 + 8) + // current_expiry
        8 + // escrow_balance
        32 + // mint
        1 // bump
    }

    /// Listed -> Hired for `days` days. If a borrower was designated on the
    /// listing the caller must match it.
    pub fn take(&mut self, caller: Pubkey, days: u16, unix_timestamp: i64) -> Result<()> {
        match self.state {
            HireState::Listed => {
                if let Some(designated) = self.borrower {
                    require_keys_eq!(designated, caller, ListingsError::Unauthorized);
                }

                // validate the whole term before recording anything, a
                // rejected take must leave the listing untouched
                let duration = i64::from(days) * SECONDS_PER_DAY;
                let current_expiry = unix_timestamp
                    .checked_add(duration)
                    .ok_or(ListingsError::NumericalOverflow)?;
                require!(current_expiry <= self.expiry, ListingsError::InvalidExpiry);

                self.borrower = Some(caller);
                self.current_start = Some(unix_timestamp);
                self.current_expiry = Some(current_expiry);
                self.state = HireState::Hired;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    /// Extends the current term. The listing-level expiry still caps it.
    pub fn extend(&mut self, days: u16) -> Result<()> {
        match self.state {
            HireState::Hired => {
                let current_expiry =
                    self.current_expiry.ok_or(ListingsError::InvalidState)?;
                let duration = i64::from(days) * SECONDS_PER_DAY;
                let new_expiry = current_expiry
                    .checked_add(duration)
                    .ok_or(ListingsError::NumericalOverflow)?;
                require!(new_expiry <= self.expiry, ListingsError::InvalidExpiry);
                self.current_expiry = Some(new_expiry);
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }

    /// Listing-time validation. A zero-rate listing must name its renter,
    /// otherwise anyone could take custody for free.
    pub fn assert_valid_listing(
        amount: u64,
        borrower: Option<Pubkey>,
        expiry: i64,
        unix_timestamp: i64,
    ) -> Result<()> {
        require!(expiry > unix_timestamp, ListingsError::InvalidExpiry);
        require!(
            amount > 0 || borrower.is_some(),
            ListingsError::BorrowerNotSpecified
        );
        Ok(())
    }

    /// Closing reclaims rent; never valid out from under a renter, whether
    /// named on the listing or currently holding the asset.
    pub fn assert_closable(&self) -> Result<()> {
        match self.state {
            HireState::Listed => {
                require!(self.borrower.is_none(), ListingsError::InvalidState);
                Ok(())
            }
            HireState::Hired => err!(ListingsError::InvalidState),
        }
    }

    /// Hired -> Listed, strictly after the current term has lapsed.
    pub fn recover(&mut self, unix_timestamp: i64) -> Result<()> {
        match self.state {
            HireState::Hired => {
                let current_expiry =
                    self.current_expiry.ok_or(ListingsError::InvalidState)?;
                require!(unix_timestamp > current_expiry, ListingsError::HireNotExpired);
                self.current_start = None;
                self.current_expiry = None;
                self.borrower = None;
                self.state = HireState::Listed;
                Ok(())
            }
            _ => err!(ListingsError::InvalidState),
        }
    }
}

#[error_code]
pub enum ListingsError {
    #[msg("Invalid state")]
    InvalidState,
    #[msg("This loan is not overdue")]
    NotOverdue,
    #[msg("Unauthorized")]
    Unauthorized,
    #[msg("Another instrument already holds custody")]
    ConflictingInstrument,
    #[msg("Insufficient balance")]
    InsufficientBalance,
    #[msg("Invalid expiry")]
    InvalidExpiry,
    #[msg("Option expired")]
    OptionExpired,
    #[msg("Option not expired")]
    OptionNotExpired,
    #[msg("Hire term not expired")]
    HireNotExpired,
    #[msg("Invalid delegate")]
    InvalidDelegate,
    #[msg("Numerical overflow")]
    NumericalOverflow,
    #[msg("Invalid mint")]
    InvalidMint,
    #[msg("Metadata doesnt exist")]
    MetadataDoesntExist,
    #[msg("Derived key invalid")]
    DerivedKeyInvalid,
    #[msg("Borrower not specified")]
    BorrowerNotSpecified,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InstrumentRegistry {
        InstrumentRegistry {
            mint: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            flags: InstrumentFlags::default(),
            bump: 255,
        }
    }

    fn listed_loan() -> Loan {
        Loan {
            state: LoanState::Listed,
            amount: 1_000_000,
            borrower: Pubkey::new_unique(),
            lender: Pubkey::default(),
            basis_points: 500,
            duration: 86_400,
            start_date: 0,
            mint: Pubkey::new_unique(),
            padding: [0; 64],
            bump: 254,
        }
    }

    fn listed_hire(borrower: Option<Pubkey>) -> Hire {
        Hire {
            state: HireState::Listed,
            amount: 10_000,
            lender: Pubkey::new_unique(),
            borrower,
            expiry: 2_000_000,
            current_start: None,
            current_expiry: None,
            escrow_balance: 0,
            mint: Pubkey::new_unique(),
            bump: 253,
        }
    }

    #[test]
    fn registry_allows_loan_then_hire() {
        let mut r = registry();
        r.set_flag(InstrumentKind::Loan, true).unwrap();
        r.set_flag(InstrumentKind::Hire, true).unwrap();
        assert!(r.flags.loan && r.flags.hire);
        assert!(!r.is_clear());
    }

    #[test]
    fn registry_rejects_loan_and_call_option() {
        let mut r = registry();
        r.set_flag(InstrumentKind::Loan, true).unwrap();
        assert!(r.set_flag(InstrumentKind::CallOption, true).is_err());

        let mut r = registry();
        r.set_flag(InstrumentKind::CallOption, true).unwrap();
        assert!(r.set_flag(InstrumentKind::Loan, true).is_err());
    }

    #[test]
    fn registry_rejects_call_option_and_hire() {
        let mut r = registry();
        r.set_flag(InstrumentKind::Hire, true).unwrap();
        assert!(r.set_flag(InstrumentKind::CallOption, true).is_err());

        let mut r = registry();
        r.set_flag(InstrumentKind::CallOption, true).unwrap();
        assert!(r.set_flag(InstrumentKind::Hire, true).is_err());
    }

    #[test]
    fn registry_clears_when_all_flags_drop() {
        let mut r = registry();
        r.set_flag(InstrumentKind::Loan, true).unwrap();
        r.set_flag(InstrumentKind::Hire, true).unwrap();
        r.set_flag(InstrumentKind::Loan, false).unwrap();
        assert!(!r.is_clear());
        r.set_flag(InstrumentKind::Hire, false).unwrap();
        assert!(r.is_clear());
    }

    #[test]
    fn loan_activation_sets_lender_and_start() {
        let mut loan = listed_loan();
        let lender = Pubkey::new_unique();
        loan.activate(lender, 1_000).unwrap();
        assert_eq!(loan.state, LoanState::Active);
        assert_eq!(loan.lender, lender);
        assert_eq!(loan.start_date, 1_000);

        // a second activation is not a listed transition
        assert!(loan.activate(lender, 2_000).is_err());
    }

    #[test]
    fn loan_repay_requires_active() {
        let mut loan = listed_loan();
        assert!(loan.mark_repaid().is_err());
        loan.activate(Pubkey::new_unique(), 1_000).unwrap();
        loan.mark_repaid().unwrap();
        assert_eq!(loan.state, LoanState::Repaid);
    }

    #[test]
    fn loan_default_boundary_is_strict() {
        let mut loan = listed_loan();
        loan.activate(Pubkey::new_unique(), 1_000).unwrap();
        let deadline = 1_000 + loan.duration;

        assert!(loan.mark_defaulted(deadline - 1).is_err());
        assert!(loan.mark_defaulted(deadline).is_err());
        assert_eq!(loan.state, LoanState::Active);

        loan.mark_defaulted(deadline + 1).unwrap();
        assert_eq!(loan.state, LoanState::Defaulted);
    }

    #[test]
    fn loan_close_rejected_while_active() {
        let mut loan = listed_loan();
        assert!(loan.assert_closable().is_ok());
        loan.activate(Pubkey::new_unique(), 0).unwrap();
        assert!(loan.assert_closable().is_err());
        loan.mark_repaid().unwrap();
        assert!(loan.assert_closable().is_ok());
    }

    #[test]
    fn option_purchase_and_exercise_window() {
        let mut option = CallOption {
            state: CallOptionState::Listed,
            amount: 500_000,
            seller: Pubkey::new_unique(),
            buyer: Pubkey::default(),
            expiry: 10_000,
            strike_price: 2_000_000,
            mint: Pubkey::new_unique(),
            padding: [0; 64],
            bump: 252,
        };
        assert!(option.exercise(5_000).is_err()); // not bought yet

        let buyer = Pubkey::new_unique();
        option.purchase(buyer).unwrap();
        assert_eq!(option.state, CallOptionState::Active);
        assert_eq!(option.buyer, buyer);
        assert!(option.purchase(buyer).is_err());

        // exercisable up to and including expiry, not after
        let mut at_expiry = option.clone();
        at_expiry.exercise(10_000).unwrap();
        assert_eq!(at_expiry.state, CallOptionState::Exercised);
        assert!(option.exercise(10_001).is_err());
    }

    #[test]
    fn option_close_rules() {
        let mut option = CallOption {
            state: CallOptionState::Listed,
            amount: 1,
            seller: Pubkey::new_unique(),
            buyer: Pubkey::default(),
            expiry: 10_000,
            strike_price: 1,
            mint: Pubkey::new_unique(),
            padding: [0; 64],
            bump: 251,
        };
        assert!(option.assert_closable(0).is_ok());

        option.purchase(Pubkey::new_unique()).unwrap();
        assert!(option.assert_closable(10_000).is_err());
        assert!(option.assert_closable(10_001).is_ok());

        option.state = CallOptionState::Exercised;
        assert!(option.assert_closable(0).is_ok());
    }

    #[test]
    fn open_hire_records_caller_as_borrower() {
        let mut hire = listed_hire(None);
        let renter = Pubkey::new_unique();
        hire.take(renter, 2, 100).unwrap();
        assert_eq!(hire.state, HireState::Hired);
        assert_eq!(hire.borrower, Some(renter));
        assert_eq!(hire.current_start, Some(100));
        assert_eq!(hire.current_expiry, Some(100 + 2 * SECONDS_PER_DAY));
    }

    #[test]
    fn designated_hire_rejects_other_callers() {
        let designated = Pubkey::new_unique();
        let mut hire = listed_hire(Some(designated));
        assert!(hire.take(Pubkey::new_unique(), 1, 100).is_err());
        assert_eq!(hire.state, HireState::Listed);
        hire.take(designated, 1, 100).unwrap();
        assert_eq!(hire.state, HireState::Hired);
    }

    #[test]
    fn hire_term_capped_by_listing_expiry() {
        let mut hire = listed_hire(None);
        hire.expiry = 100 + SECONDS_PER_DAY;
        assert!(hire.take(Pubkey::new_unique(), 2, 100).is_err());
        hire.take(Pubkey::new_unique(), 1, 100).unwrap();
        assert!(hire.extend(1).is_err());
    }

    #[test]
    fn zero_rate_listing_requires_designated_borrower() {
        // an open listing at zero rate would hand custody over for free
        assert!(Hire::assert_valid_listing(0, None, 1_000, 0).is_err());
        assert!(Hire::assert_valid_listing(0, Some(Pubkey::new_unique()), 1_000, 0).is_ok());
        assert!(Hire::assert_valid_listing(10_000, None, 1_000, 0).is_ok());
        // expiry must still lie in the future
        assert!(Hire::assert_valid_listing(10_000, None, 1_000, 1_000).is_err());
    }

    #[test]
    fn failed_take_leaves_listing_unclaimed() {
        let mut hire = listed_hire(None);
        hire.expiry = 100 + SECONDS_PER_DAY;

        // term overruns the listing expiry, nothing may be recorded
        assert!(hire.take(Pubkey::new_unique(), 2, 100).is_err());
        assert_eq!(hire.state, HireState::Listed);
        assert_eq!(hire.borrower, None);
        assert_eq!(hire.current_start, None);
        assert_eq!(hire.current_expiry, None);

        // a different caller with a valid term is not locked out
        let renter = Pubkey::new_unique();
        hire.take(renter, 1, 100).unwrap();
        assert_eq!(hire.borrower, Some(renter));
    }

    #[test]
    fn hire_close_rejected_with_borrower_attached() {
        let open = listed_hire(None);
        assert!(open.assert_closable().is_ok());

        // a designated listing stays open for its named counterparty
        let designated = listed_hire(Some(Pubkey::new_unique()));
        assert!(designated.assert_closable().is_err());

        let mut hired = listed_hire(None);
        hired.take(Pubkey::new_unique(), 1, 100).unwrap();
        assert!(hired.assert_closable().is_err());
    }

    #[test]
    fn hire_recovery_boundary_is_strict() {
        let mut hire = listed_hire(None);
        hire.take(Pubkey::new_unique(), 1, 0).unwrap();
        let term_end = SECONDS_PER_DAY;
        assert!(hire.recover(term_end).is_err());
        hire.recover(term_end + 1).unwrap();
        assert_eq!(hire.state, HireState::Listed);
        assert_eq!(hire.borrower, None);
        assert_eq!(hire.current_expiry, None);
    }

    #[test]
    fn account_sizes_cover_serialized_fields() {
        assert_eq!(InstrumentRegistry::space(), 8 + 32 + 32 + 3 + 1);
        assert_eq!(Loan::space(), 8 + 1 + 8 + 32 + 32 + 4 + 8 + 8 + 32 + 64 + 1);
        assert_eq!(CallOption::space(), 8 + 1 + 8 + 32 + 32 + 8 + 8 + 32 + 64 + 1);
        assert_eq!(Hire::space(), 8 + 1 + 8 + 32 + 33 + 8 + 9 + 9 + 8 + 32 + 1);
    }
}
