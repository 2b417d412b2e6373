use anchor_lang::prelude::*;
use anchor_lang::solana_program::program::invoke;
use anchor_lang::solana_program::system_instruction;
use anchor_spl::associated_token::AssociatedToken;
use anchor_spl::token::{Mint, Token, TokenAccount};

use crate::custody;
use crate::royalty::pay_creator_royalties;
use crate::state::{
    CallOption, CallOptionState, InstrumentKind, InstrumentRegistry, ListingsError,
};

#[derive(Accounts)]
#[instruction(amount: u64, strike_price: u64, expiry: i64)]
pub struct InitCallOption<'info> {
    #[account(mut)]
    pub seller: Signer<'info>,
    #[account(
        mut,
        constraint = deposit_token_account.amount == 1 @ ListingsError::InsufficientBalance,
        associated_token::mint = mint,
        associated_token::authority = seller,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        init,
        payer = seller,
        seeds = [
            CallOption::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        space = CallOption::space(),
        bump,
    )]
    pub call_option: Box<Account<'info, CallOption>>,
    #[account(
        init_if_needed,
        payer = seller,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        space = InstrumentRegistry::space(),
        bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    #[account(constraint = mint.supply == 1 @ ListingsError::InvalidMint)]
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub rent: Sysvar<'info, Rent>,
}

pub fn handle_init_call_option(
    ctx: Context<InitCallOption>,
    amount: u64,
    strike_price: u64,
    expiry: i64,
) -> Result<()> {
    let call_option = &mut ctx.accounts.call_option;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    require!(expiry > unix_timestamp, ListingsError::InvalidExpiry);

    registry.set_flag(InstrumentKind::CallOption, true)?;
    registry.mint = ctx.accounts.mint.key();
    registry.authority = ctx.accounts.seller.key();
    registry.bump = ctx.bumps.registry;

    call_option.state = CallOptionState::Listed;
    call_option.amount = amount;
    call_option.seller = ctx.accounts.seller.key();
    call_option.buyer = Pubkey::default();
    call_option.expiry = expiry;
    call_option.strike_price = strike_price;
    call_option.mint = ctx.accounts.mint.key();
    call_option.bump = ctx.bumps.call_option;

    custody::acquire_custody(
        registry,
        ctx.accounts.token_program.to_account_info(),
        &ctx.accounts.deposit_token_account,
        ctx.accounts.seller.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(CallOptionListed {
        call_option: call_option.key(),
        mint: call_option.mint,
        seller: call_option.seller,
        amount,
        strike_price,
        expiry,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct BuyCallOption<'info> {
    #[account(mut)]
    pub buyer: Signer<'info>,
    /// CHECK: constrained on the call option account
    #[account(mut)]
    pub seller: AccountInfo<'info>,
    #[account(
        mut,
        seeds = [
            CallOption::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        bump = call_option.bump,
        has_one = mint,
        has_one = seller,
        constraint = call_option.seller != buyer.key() @ ListingsError::Unauthorized,
        constraint = call_option.state == CallOptionState::Listed @ ListingsError::InvalidState,
    )]
    pub call_option: Box<Account<'info, CallOption>>,
    pub mint: Box<Account<'info, Mint>>,
    pub system_program: Program<'info, System>,
}

pub fn handle_buy_call_option(ctx: Context<BuyCallOption>) -> Result<()> {
    let call_option = &mut ctx.accounts.call_option;

    call_option.purchase(ctx.accounts.buyer.key())?;

    // the premium goes straight to the seller, it is never refundable
    invoke(
        &system_instruction::transfer(
            &call_option.buyer,
            &call_option.seller,
            call_option.amount,
        ),
        &[
            ctx.accounts.buyer.to_account_info(),
            ctx.accounts.seller.to_account_info(),
        ],
    )?;

    emit!(CallOptionBought {
        call_option: call_option.key(),
        buyer: call_option.buyer,
        amount: call_option.amount,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct ExerciseCallOption<'info> {
    #[account(mut)]
    pub buyer: Signer<'info>,
    /// CHECK: constrained on the call option account
    #[account(mut)]
    pub seller: AccountInfo<'info>,
    #[account(
        mut,
        constraint = deposit_token_account.amount == 1 @ ListingsError::InsufficientBalance,
        associated_token::mint = mint,
        associated_token::authority = seller,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        init_if_needed,
        payer = buyer,
        associated_token::mint = mint,
        associated_token::authority = buyer,
    )]
    pub buyer_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            CallOption::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        bump = call_option.bump,
        has_one = mint,
        has_one = seller,
        has_one = buyer,
        constraint = call_option.state == CallOptionState::Active @ ListingsError::InvalidState,
    )]
    pub call_option: Box<Account<'info, CallOption>>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        bump = registry.bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated against the mint's metadata pda
    pub metadata: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    /// Misc
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
    pub associated_token_program: Program<'info, AssociatedToken>,
    pub rent: Sysvar<'info, Rent>,
}

/// Settles the sale atomically: strike price out of the buyer, creator
/// royalties carved off, remainder to the seller, asset to the buyer.
pub fn handle_exercise_call_option<'info>(
    ctx: Context<'_, '_, '_, 'info, ExerciseCallOption<'info>>,
) -> Result<()> {
    let call_option = &mut ctx.accounts.call_option;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    call_option.exercise(unix_timestamp)?;
    registry.set_flag(InstrumentKind::CallOption, false)?;
    msg!("Exercising at strike price {}", call_option.strike_price);

    let remaining_amount = pay_creator_royalties(
        &mut ctx.remaining_accounts.iter(),
        call_option.strike_price,
        &ctx.accounts.mint.to_account_info(),
        &ctx.accounts.metadata.to_account_info(),
        &ctx.accounts.buyer.to_account_info(),
        &ctx.accounts.deposit_token_account,
    )?;

    invoke(
        &system_instruction::transfer(
            &call_option.buyer,
            &call_option.seller,
            remaining_amount,
        ),
        &[
            ctx.accounts.buyer.to_account_info(),
            ctx.accounts.seller.to_account_info(),
        ],
    )?;

    custody::thaw_and_transfer_from_token_account(
        registry,
        ctx.accounts.token_program.to_account_info(),
        ctx.accounts.deposit_token_account.to_account_info(),
        ctx.accounts.buyer_token_account.to_account_info(),
        ctx.accounts.mint.to_account_info(),
        ctx.accounts.edition.to_account_info(),
        ctx.accounts.metadata_program.to_account_info(),
    )?;

    emit!(CallOptionExercised {
        call_option: call_option.key(),
        buyer: call_option.buyer,
        strike_price: call_option.strike_price,
    });

    Ok(())
}

#[derive(Accounts)]
pub struct CloseCallOption<'info> {
    #[account(mut)]
    pub seller: Signer<'info>,
    #[account(
        mut,
        associated_token::mint = mint,
        associated_token::authority = seller,
    )]
    pub deposit_token_account: Box<Account<'info, TokenAccount>>,
    #[account(
        mut,
        seeds = [
            CallOption::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        bump = call_option.bump,
        has_one = mint,
        has_one = seller,
        close = seller,
    )]
    pub call_option: Box<Account<'info, CallOption>>,
    #[account(
        mut,
        seeds = [
            InstrumentRegistry::PREFIX,
            mint.key().as_ref(),
            seller.key().as_ref(),
        ],
        bump = registry.bump,
    )]
    pub registry: Box<Account<'info, InstrumentRegistry>>,
    pub mint: Box<Account<'info, Mint>>,
    /// CHECK: validated in cpi
    pub edition: UncheckedAccount<'info>,
    /// CHECK: validated in cpi
    pub metadata_program: UncheckedAccount<'info>,
    pub system_program: Program<'info, System>,
    pub token_program: Program<'info, Token>,
}

pub fn handle_close_call_option(ctx: Context<CloseCallOption>) -> Result<()> {
    let call_option = &ctx.accounts.call_option;
    let registry = &mut ctx.accounts.registry;
    let unix_timestamp = Clock::get()?.unix_timestamp;

    call_option.assert_closable(unix_timestamp)?;
    registry.set_flag(InstrumentKind::CallOption, false)?;

    emit!(CallOptionClosed {
        call_option: call_option.key(),
    });

    // after exercise the deposit account no longer holds the asset
    if ctx.accounts.deposit_token_account.amount == 1 {
        custody::release_custody(
            registry,
            ctx.accounts.token_program.to_account_info(),
            &ctx.accounts.deposit_token_account,
            ctx.accounts.seller.to_account_info(),
            ctx.accounts.mint.to_account_info(),
            ctx.accounts.edition.to_account_info(),
            ctx.accounts.metadata_program.to_account_info(),
        )?;
    }

    Ok(())
}

#[event]
pub struct CallOptionListed {
    pub call_option: Pubkey,
    pub mint: Pubkey,
    pub seller: Pubkey,
    pub amount: u64,
    pub strike_price: u64,
    pub expiry: i64,
}

#[event]
pub struct CallOptionBought {
    pub call_option: Pubkey,
    pub buyer: Pubkey,
    pub amount: u64,
}

#[event]
pub struct CallOptionExercised {
    pub call_option: Pubkey,
    pub buyer: Pubkey,
    pub strike_price: u64,
}

#[event]
pub struct CallOptionClosed {
    pub call_option: Pubkey,
}
